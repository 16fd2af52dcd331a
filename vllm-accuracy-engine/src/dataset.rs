//! Evaluation text acquisition
//!
//! wikitext-2-raw-v1 is pulled page by page from the HuggingFace
//! datasets-server `rows` API. A local text file can be used instead.

use std::path::Path;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::DatasetSettings;
use crate::error::EvalError;

type Result<T> = crate::error::Result<T>;

#[derive(Debug, Deserialize)]
struct RowsPage {
    #[serde(default)]
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: TextRow,
}

#[derive(Debug, Deserialize)]
struct TextRow {
    #[serde(default)]
    text: Option<String>,
}

/// Join the rows that are not blank with `\n`, leaving each row as is.
pub fn join_non_blank<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    rows.into_iter()
        .filter(|r| !r.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn fetch_page(http: &Client, ds: &DatasetSettings, offset: usize) -> Result<RowsPage> {
    let response = http
        .get(&ds.rows_url)
        .query(&[
            ("dataset", ds.name.as_str()),
            ("config", ds.config.as_str()),
            ("split", ds.split.as_str()),
        ])
        .query(&[("offset", offset), ("length", ds.page_size)])
        .timeout(std::time::Duration::from_secs(ds.timeout_secs))
        .send()
        .map_err(|e| EvalError::Dataset(e.into()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EvalError::Dataset(
            format!("{} returned HTTP {} at offset {}", ds.rows_url, status, offset).into(),
        ));
    }
    response.json().map_err(|e| EvalError::Dataset(e.into()))
}

/// Download the configured split and return its non-blank rows joined by `\n`.
pub fn download_wikitext(http: &Client, ds: &DatasetSettings) -> Result<String> {
    if ds.page_size == 0 {
        return Err(EvalError::Config("dataset page size must be positive".into()));
    }
    info!("Downloading {} ({}, {} split)...", ds.name, ds.config, ds.split);

    let mut rows: Vec<String> = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = fetch_page(http, ds, offset)?;
        if page.rows.is_empty() {
            break;
        }
        offset += page.rows.len();
        rows.extend(page.rows.into_iter().filter_map(|r| r.row.text));
        debug!("Fetched {} rows", offset);

        if page.num_rows_total.is_some_and(|total| offset >= total) {
            break;
        }
    }

    if rows.is_empty() {
        return Err(EvalError::Dataset(
            format!("{}/{} has no rows", ds.name, ds.config).into(),
        ));
    }
    Ok(join_non_blank(rows.iter().map(String::as_str)))
}

/// Read a local UTF-8 text file to evaluate instead of wikitext.
pub fn read_text_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| EvalError::Dataset(e.into()))?;
    if text.trim().is_empty() {
        return Err(EvalError::Dataset(
            format!("{} is empty", path.display()).into(),
        ));
    }
    Ok(text)
}
