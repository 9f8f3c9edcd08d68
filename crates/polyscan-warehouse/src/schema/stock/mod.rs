pub mod tickers;
