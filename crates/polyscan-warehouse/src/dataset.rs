use anyhow::{Context, Result};
use csv::StringRecord;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::trace;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Reading run files back
//
////////////////////////////////////////////////////////////////////////////////////////////////////

pub static EXCHANGE: &str = "primary_exchange";
pub static TYPE: &str = "type";
pub static MARKET: &str = "market";
pub static CURRENCY: &str = "currency_name";
pub static TICKER: &str = "ticker";
pub static NAME: &str = "name";

/// A run file, loaded whole.
///
/// Columns differ from run to run, so every lookup is by header name and
/// every column-specific view returns `None` when its column is absent.
#[derive(Debug, Default)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

impl Dataset {
    pub fn load(path: &Path) -> Result<Self> {
        trace!("loading dataset from {}", path.display());
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("failed to read {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// How often each non-empty value of `name` occurs, most frequent first
    /// (ties by value).
    pub fn value_counts(&self, name: &str) -> Option<Vec<(String, usize)>> {
        let col = self.column(name)?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in self.rows.iter().map(|row| field(row, col)) {
            if !value.is_empty() {
                *counts.entry(value).or_default() += 1;
            }
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(value, n)| (value.to_string(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Some(counts)
    }

    pub fn unique(&self, name: &str) -> Option<usize> {
        let col = self.column(name)?;
        let values: HashSet<&str> = self
            .rows
            .iter()
            .map(|row| field(row, col))
            .filter(|value| !value.is_empty())
            .collect();
        Some(values.len())
    }

    /// Every column with the number of rows holding a value in it, in header order.
    pub fn fill_counts(&self) -> Vec<(&str, usize)> {
        self.headers
            .iter()
            .enumerate()
            .map(|(col, name)| {
                let filled = self
                    .rows
                    .iter()
                    .filter(|row| !field(row, col).is_empty())
                    .count();
                (name.as_str(), filled)
            })
            .collect()
    }

    /// The first `n` rows, for a preview.
    pub fn head(&self, n: usize) -> Vec<&StringRecord> {
        self.rows.iter().take(n).collect()
    }

    /// Sorted distinct values of `name`; the choices offered for a filter.
    pub fn choices(&self, name: &str) -> Option<Vec<String>> {
        let mut values: Vec<String> = self
            .value_counts(name)?
            .into_iter()
            .map(|(value, _)| value)
            .collect();
        values.sort();
        Some(values)
    }

    /// Whether free-text search is possible, i.e., both `ticker` & `name` exist.
    pub fn searchable(&self) -> bool {
        self.column(TICKER).is_some() && self.column(NAME).is_some()
    }

    /// Rows passing every filter. Filters on a column the file lacks are ignored.
    pub fn filter(&self, filter: &Filter) -> Vec<&StringRecord> {
        let equals: Vec<(usize, &str)> = [
            (EXCHANGE, filter.exchange.as_deref()),
            (TYPE, filter.kind.as_deref()),
            (MARKET, filter.market.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, wanted)| Some((self.column(name)?, wanted?)))
        .collect();

        let search = match (&filter.query, self.column(TICKER), self.column(NAME)) {
            (Some(query), Some(ticker), Some(name)) if !query.is_empty() => {
                Some((query.to_lowercase(), ticker, name))
            }
            _ => None,
        };

        self.rows
            .iter()
            .filter(|row| equals.iter().all(|(col, wanted)| field(row, *col) == *wanted))
            .filter(|row| match &search {
                Some((query, ticker, name)) => {
                    field(row, *ticker).to_lowercase().contains(query.as_str())
                        || field(row, *name).to_lowercase().contains(query.as_str())
                }
                None => true,
            })
            .collect()
    }
}

fn field(row: &StringRecord, col: usize) -> &str {
    row.get(col).unwrap_or("")
}

/// Explorer filters; `None` is "All".
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub exchange: Option<String>,
    pub kind: Option<String>,
    pub market: Option<String>,
    /// Case-insensitive substring of the ticker or the company name.
    pub query: Option<String>,
}

/// The slice of `total` rows shown on 1-based `page`, clamped to the last page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub pages: usize,
    pub start: usize,
    pub end: usize,
    pub total: usize,
}

impl Page {
    pub fn of(total: usize, number: usize, size: usize) -> Self {
        let size = size.max(1);
        let pages = if total == 0 { 1 } else { (total - 1) / size + 1 };
        let number = number.clamp(1, pages);
        let start = ((number - 1) * size).min(total);
        let end = (start + size).min(total);
        Self {
            number,
            pages,
            start,
            end,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
ticker,name,market,primary_exchange,type,currency_name
AAPL,Apple Inc.,stocks,XNAS,CS,usd
MSFT,Microsoft Corp,stocks,XNAS,CS,usd
SPY,SPDR S&P 500 ETF Trust,stocks,ARCX,ETF,usd
IBM,International Business Machines,stocks,XNYS,CS,usd
BRK.A,Berkshire Hathaway,stocks,XNYS,CS,
";

    fn sample() -> Dataset {
        Dataset::from_reader(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn value_counts_are_most_frequent_first() {
        let data = sample();
        assert_eq!(
            data.value_counts(EXCHANGE).unwrap(),
            [
                ("XNAS".to_string(), 2),
                ("XNYS".to_string(), 2),
                ("ARCX".to_string(), 1)
            ]
        );
        assert_eq!(data.unique(TYPE), Some(2));
        assert_eq!(data.unique(CURRENCY), Some(1));
    }

    #[test]
    fn fill_counts_skip_blank_and_short_rows() {
        let data =
            Dataset::from_reader("ticker,name,cik\nA,Agilent,1\nB,,\nC\n".as_bytes()).unwrap();
        assert_eq!(data.fill_counts(), [("ticker", 3), ("name", 1), ("cik", 1)]);

        let head: Vec<&str> = data.head(2).iter().map(|row| &row[0]).collect();
        assert_eq!(head, ["A", "B"]);
        assert_eq!(data.head(10).len(), 3);
    }

    #[test]
    fn missing_columns_yield_none() {
        let data = Dataset::from_reader("ticker,name\nA,Agilent\n".as_bytes()).unwrap();
        assert!(data.value_counts(EXCHANGE).is_none());
        assert!(data.unique(CURRENCY).is_none());
        assert!(data.searchable());
    }

    #[test]
    fn filters_combine() {
        let data = sample();
        let filter = Filter {
            exchange: Some("XNYS".into()),
            kind: Some("CS".into()),
            ..Filter::default()
        };
        let tickers: Vec<_> = data
            .filter(&filter)
            .into_iter()
            .map(|row| row.get(0).unwrap())
            .collect();
        assert_eq!(tickers, ["IBM", "BRK.A"]);
    }

    #[test]
    fn search_matches_ticker_or_name_case_insensitively() {
        let data = sample();
        let search = |query: &str| -> Vec<String> {
            let filter = Filter {
                query: Some(query.into()),
                ..Filter::default()
            };
            data.filter(&filter)
                .into_iter()
                .map(|row| row.get(0).unwrap().to_string())
                .collect()
        };
        assert_eq!(search("Msf"), ["MSFT"]);
        // "Apple Inc." & "International Business Machines" by name
        assert_eq!(search("IN"), ["AAPL", "IBM"]);
    }

    #[test]
    fn filters_on_absent_columns_are_ignored() {
        let data = Dataset::from_reader("ticker\nA\nB\n".as_bytes()).unwrap();
        let filter = Filter {
            market: Some("crypto".into()),
            query: Some("zzz".into()),
            ..Filter::default()
        };
        assert_eq!(data.filter(&filter).len(), 2);
    }

    #[test]
    fn short_rows_are_tolerated() {
        let data = Dataset::from_reader("ticker,name,type\nA,Agilent\nB,Boeing,CS\n".as_bytes())
            .unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.value_counts(TYPE).unwrap(), [("CS".to_string(), 1)]);
    }

    #[test]
    fn pages_are_clamped() {
        assert_eq!(
            Page::of(250, 3, 100),
            Page { number: 3, pages: 3, start: 200, end: 250, total: 250 }
        );
        assert_eq!(Page::of(250, 9, 100).number, 3);
        assert_eq!(Page::of(0, 1, 100), Page { number: 1, pages: 1, start: 0, end: 0, total: 0 });
    }
}
