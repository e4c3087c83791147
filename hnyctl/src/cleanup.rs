//! Stale schema cleanup: columns and whole datasets.
//!
//! Selection is pure over the listed entities; the deletion loops honor
//! dry-run and keep going past individual failures so one stuck column does
//! not abort a sweep.

use chrono::NaiveDate;

use crate::client::resources::{Column, Dataset};
use crate::client::ApiClient;
use crate::error::{HnyError, Result};

/// Substrings that mark pentester/garbage schema names.
pub const SPAMMY_STRINGS: &[&str] = &[
    "oastify", "burp", "xml", "jndi", "ldap", // pentester
    "%", "{", "(", "*", "!", "?", "<", "..", "|", "&", "\"", "'", "\r", "\n", "`", "--", "u0",
    "\\", "@",
];

fn is_spammy(name: &str) -> bool {
    SPAMMY_STRINGS.iter().any(|s| name.contains(s))
}

/// Which columns a sweep targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ColumnMode {
    /// Columns marked hidden
    Hidden,
    /// Columns whose name matches the spammy substring table
    Spammy,
    /// Columns created on the given date
    Date,
    /// Columns last written before the given date
    LastWrittenBefore,
}

/// Which datasets a sweep targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DatasetMode {
    /// Datasets whose name matches the spammy substring table
    Spammy,
    /// Datasets created on the given date
    Date,
    /// Datasets with no writes since the given date
    LastWritten,
}

fn require_date(date: Option<NaiveDate>, mode: &str) -> Result<NaiveDate> {
    date.ok_or_else(|| HnyError::Config(format!("--date YYYY-MM-DD is required with mode {mode}")))
}

/// Select the columns a sweep would delete. Pure.
pub fn select_columns(
    columns: &[Column],
    mode: ColumnMode,
    date: Option<NaiveDate>,
) -> Result<Vec<Column>> {
    let selected = match mode {
        ColumnMode::Hidden => columns.iter().filter(|c| c.hidden).cloned().collect(),
        ColumnMode::Spammy => columns
            .iter()
            .filter(|c| is_spammy(&c.key_name))
            .cloned()
            .collect(),
        ColumnMode::Date => {
            let date = require_date(date, "date")?;
            columns
                .iter()
                .filter(|c| c.created_at.map(|t| t.date_naive()) == Some(date))
                .cloned()
                .collect()
        }
        ColumnMode::LastWrittenBefore => {
            let date = require_date(date, "last-written-before")?;
            columns
                .iter()
                .filter(|c| c.last_written.map(|t| t.date_naive() < date).unwrap_or(false))
                .cloned()
                .collect()
        }
    };
    Ok(selected)
}

/// Select the datasets a sweep would delete. Pure.
pub fn select_datasets(
    datasets: &[Dataset],
    mode: DatasetMode,
    date: Option<NaiveDate>,
) -> Result<Vec<Dataset>> {
    let selected = match mode {
        DatasetMode::Spammy => datasets
            .iter()
            .filter(|d| is_spammy(&d.name))
            .cloned()
            .collect(),
        DatasetMode::Date => {
            let date = require_date(date, "date")?;
            datasets
                .iter()
                .filter(|d| d.created_at.map(|t| t.date_naive()) == Some(date))
                .cloned()
                .collect()
        }
        DatasetMode::LastWritten => {
            let date = require_date(date, "last-written")?;
            datasets
                .iter()
                .filter(|d| {
                    d.last_written_at
                        .map(|t| t.date_naive() < date)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        }
    };
    Ok(selected)
}

/// Runs cleanup sweeps against one client.
pub struct Cleaner {
    client: ApiClient,
    dry_run: bool,
}

impl Cleaner {
    pub fn new(client: ApiClient, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Delete the selected columns in a dataset. Returns how many were
    /// deleted (or would be, in dry-run).
    pub async fn cleanup_columns(
        &self,
        dataset: &str,
        mode: ColumnMode,
        date: Option<NaiveDate>,
    ) -> Result<usize> {
        let columns = self.client.list_columns(dataset).await?;
        let targets = select_columns(&columns, mode, date)?;

        let mut deleted = 0;
        for column in &targets {
            tracing::info!(id = %column.id, name = %column.key_name, "Deleting column");
            if self.dry_run {
                deleted += 1;
                continue;
            }
            match self.client.delete_column(dataset, &column.id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::error!(id = %column.id, error = %e, "Failed to delete column, moving on");
                }
            }
        }
        Ok(deleted)
    }

    /// Delete the selected datasets, clearing delete protection first.
    pub async fn cleanup_datasets(
        &self,
        mode: DatasetMode,
        date: Option<NaiveDate>,
    ) -> Result<usize> {
        let datasets = self.client.list_datasets().await?;
        let targets = select_datasets(&datasets, mode, date)?;

        let mut deleted = 0;
        for dataset in &targets {
            tracing::info!(slug = %dataset.slug, "Deleting dataset");
            if self.dry_run {
                deleted += 1;
                continue;
            }
            if let Err(e) = self.client.disable_delete_protection(&dataset.slug).await {
                tracing::error!(slug = %dataset.slug, error = %e, "Failed to remove delete protection, moving on");
                continue;
            }
            match self.client.delete_dataset(&dataset.slug).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::error!(slug = %dataset.slug, error = %e, "Failed to delete dataset, moving on");
                }
            }
        }
        Ok(deleted)
    }
}
