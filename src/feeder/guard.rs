use crate::feeder::columns::ColumnResolver;
use crate::feeder::csv_source::{is_empty_row, read_csv_file};
use crate::feeder::error::FeedError;
use crate::feeder::sequencer::ImportFile;
use crate::store::IdentityStore;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// `externalId` values of one file; files without that column contribute nothing.
fn file_external_ids(file: &ImportFile, resolver: &ColumnResolver) -> Result<Vec<String>, FeedError> {
    let table = read_csv_file(&file.path).map_err(|e| FeedError::Csv {
        file: file.name.clone(),
        message: format!("{e:#}"),
    })?;
    let Some(header) = table.header() else {
        return Err(FeedError::InvalidColumns {
            file: file.name.clone(),
        });
    };
    let columns = resolver.resolve(header, file.profile_name());
    if columns.iter().all(|c| c.is_empty()) {
        return Err(FeedError::InvalidColumns {
            file: file.name.clone(),
        });
    }
    let Some(idx) = columns.iter().position(|c| c == "externalId") else {
        return Ok(Vec::new());
    };
    Ok(table
        .data_rows()
        .filter(|(_, row)| !is_empty_row(row))
        .filter_map(|(_, row)| row.get(idx))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

/// Reads every file at once and waits for all of them before returning.
pub fn collect_external_ids(
    files: &[ImportFile],
    resolver: &ColumnResolver,
) -> Result<BTreeSet<String>, FeedError> {
    let results: Vec<Result<Vec<String>, FeedError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = files
            .iter()
            .map(|file| (file, scope.spawn(move || file_external_ids(file, resolver))))
            .collect();
        handles
            .into_iter()
            .map(|(file, h)| {
                h.join().unwrap_or_else(|_| {
                    Err(FeedError::Csv {
                        file: file.name.clone(),
                        message: "reader thread panicked".to_string(),
                    })
                })
            })
            .collect()
    });

    let mut ids = BTreeSet::new();
    for r in results {
        ids.extend(r?);
    }
    Ok(ids)
}

/// Refuses the run when an uploaded id belongs to a live user fed by an authoritative source.
pub fn check_external_ids<S: IdentityStore + ?Sized>(
    store: &S,
    files: &[ImportFile],
    resolver: &ColumnResolver,
    authoritative_sources: &[String],
) -> Result<(), FeedError> {
    let ids = collect_external_ids(files, resolver)?;
    if ids.is_empty() {
        info!("guard check: no explicit externalId");
        return Ok(());
    }
    let ids: Vec<String> = ids.into_iter().collect();
    let owned = store
        .query_authoritative_ids(&ids, authoritative_sources)
        .map_err(FeedError::store)?;
    if owned.is_empty() {
        info!(candidates = ids.len(), "guard check passed");
        return Ok(());
    }
    warn!(count = owned.len(), "guard check refused authoritative externalIds");
    Err(FeedError::UnmodifiableExternalIds(owned))
}
