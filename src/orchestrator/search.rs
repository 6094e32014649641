//! Keyword search over the stored corpus.

use std::io::{self, BufRead, Write};
use tracing::{error, info, instrument};

use crate::models::Article;
use crate::storage::{MongoStore, SearchQuery, StoreError};

/// Category under which `search --add-topic` stores its query.
pub const SEARCH_CATEGORY: &str = "search";

/// Split a comma separated `--sources` value, dropping blanks.
pub fn parse_sources(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Ask on `output` until a non-empty line arrives on `input`.
pub fn prompt_query<R: BufRead, W: Write>(mut input: R, mut output: W) -> io::Result<String> {
    loop {
        write!(output, "Enter search query: ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no query given"));
        }
        let query = line.trim();
        if !query.is_empty() {
            return Ok(query.to_string());
        }
        writeln!(output, "Query cannot be empty")?;
    }
}

/// Newest articles whose title or body contains `query.text`.
#[instrument(level = "info", skip(mongo), fields(text = %query.text, days = query.days))]
pub async fn search_news(mongo: &MongoStore, query: &SearchQuery) -> Result<Vec<Article>, StoreError> {
    if query.text.trim().is_empty() {
        error!("Empty search query");
        return Ok(Vec::new());
    }
    let articles = mongo.search(query).await?;
    info!(count = articles.len(), "Search for '{}' returned results", query.text);
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(parse_sources(None), Vec::<String>::new());
        assert_eq!(parse_sources(Some("Reuters, FT,,")), vec!["Reuters", "FT"]);
    }

    #[test]
    fn test_prompt_query_skips_blank_lines() {
        let input = io::Cursor::new("\n  \n Gold price \n");
        let mut output = Vec::new();
        assert_eq!(prompt_query(input, &mut output).unwrap(), "Gold price");
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("Query cannot be empty").count(), 2);
    }

    #[test]
    fn test_prompt_query_eof() {
        let err = prompt_query(io::Cursor::new(""), Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
