use crate::feeder::columns::{ColumnResolver, ColumnsMapping};
use crate::feeder::context::RunContext;
use crate::feeder::csv_source::read_csv_file;
use crate::feeder::error::FeedError;
use crate::feeder::guard::check_external_ids;
use crate::feeder::report::ImportReport;
use crate::feeder::rows::RowImporter;
use crate::feeder::sequencer::{list_import_files, FileSequencer, ImportFile, SequenceDriver};
use crate::feeder::structure::{Structure, StructureDescriptor};
use crate::store::IdentityStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub columns_mapping: ColumnsMapping,
    pub override_class: Option<String>,
    pub authoritative_sources: Vec<String>,
}

/// Terminal signal of one run plus everything the report collected on the way.
#[derive(Debug)]
pub struct ImportOutcome {
    pub report: ImportReport,
    pub result: Result<(), FeedError>,
}

/// The single structure directory under the import root.
pub fn structure_dir(root: &Path) -> Result<PathBuf, FeedError> {
    let list_err = |message: String| FeedError::ListFiles { message };
    let mut dirs = Vec::new();
    let entries = std::fs::read_dir(root)
        .map_err(|e| list_err(format!("{}: {}", root.to_string_lossy(), e)))?;
    for ent in entries {
        let p = ent.map_err(|e| list_err(e.to_string()))?.path();
        if p.is_dir() {
            dirs.push(p);
        }
    }
    if dirs.len() != 1 {
        return Err(list_err(format!("found {} directories", dirs.len())));
    }
    Ok(dirs.remove(0))
}

/// Descriptor of `dir`, with a request-level override class taking precedence.
pub fn load_descriptor(dir: &Path, override_class: Option<&str>) -> Result<StructureDescriptor, FeedError> {
    let mut d = StructureDescriptor::from_dir(dir).map_err(|e| FeedError::Structure {
        dir: dir.to_string_lossy().to_string(),
        message: format!("{e:#}"),
    })?;
    if let Some(class) = override_class.map(str::trim).filter(|c| !c.is_empty()) {
        d.override_class = Some(class.to_string());
    }
    Ok(d)
}

pub struct CsvFeeder {
    options: ImportOptions,
    resolver: ColumnResolver,
}

impl CsvFeeder {
    pub fn new(options: ImportOptions) -> Self {
        let resolver = ColumnResolver::new(&options.columns_mapping);
        Self { options, resolver }
    }

    /// Runs one import of `root` against `store`.
    pub fn launch<S: IdentityStore + ?Sized>(&self, store: &mut S, root: &Path) -> ImportOutcome {
        let mut report = ImportReport::default();
        let result = self.run(store, root, &mut report);
        match &result {
            Ok(()) if report.has_errors() => warn!(
                profiles = ?report.profiles,
                skipped_rows = report.errors_with_code("invalid.child.mapping").count(),
                "import finished with row errors"
            ),
            Ok(()) => info!(profiles = ?report.profiles, "import finished"),
            Err(e) => error!(code = %e.code(), error = %e, "import failed"),
        }
        ImportOutcome { report, result }
    }

    /// Guard Check only; nothing is written.
    pub fn check<S: IdentityStore + ?Sized>(&self, store: &S, root: &Path) -> Result<(), FeedError> {
        let dir = structure_dir(root)?;
        load_descriptor(&dir, None)?;
        let files = list_files(&dir)?;
        check_external_ids(store, &files, &self.resolver, &self.options.authoritative_sources)
    }

    fn run<S: IdentityStore + ?Sized>(
        &self,
        store: &mut S,
        root: &Path,
        report: &mut ImportReport,
    ) -> Result<(), FeedError> {
        let dir = structure_dir(root)?;
        let descriptor = load_descriptor(&dir, self.options.override_class.as_deref())?;
        let files = list_files(&dir)?;
        check_external_ids(&*store, &files, &self.resolver, &self.options.authoritative_sources)?;

        let structure = store
            .upsert_structure(&descriptor)
            .map_err(|e| FeedError::Structure {
                dir: dir.to_string_lossy().to_string(),
                message: format!("{e:#}"),
            })?;
        report.structure = Some(structure.external_id().to_string());
        info!(
            structure = structure.external_id(),
            name = structure.name(),
            override_class = structure.override_class().unwrap_or(""),
            classes = structure.classes().count(),
            groups = structure.groups().count(),
            "structure resolved"
        );

        let field_of_study = store.field_of_study().map_err(FeedError::store)?;
        let ctx = RunContext::new();
        info!(seed = ctx.seed(), "import run started");

        let mut driver = FeedDriver {
            store,
            structure,
            ctx,
            field_of_study,
            resolver: &self.resolver,
        };
        let mut sequencer = FileSequencer::new(files);
        let order: Vec<&str> = sequencer.files().iter().map(|f| f.name.as_str()).collect();
        info!(files = ?order, "import order");
        let result = sequencer.run(&mut driver, report);
        debug!(state = ?sequencer.state(), "sequencer stopped");
        result
    }
}

fn list_files(dir: &Path) -> Result<Vec<ImportFile>, FeedError> {
    list_import_files(dir).map_err(|e| FeedError::ListFiles {
        message: format!("{e:#}"),
    })
}

struct FeedDriver<'a, S: IdentityStore + ?Sized> {
    store: &'a mut S,
    structure: Structure,
    ctx: RunContext,
    field_of_study: HashMap<String, String>,
    resolver: &'a ColumnResolver,
}

impl<S: IdentityStore + ?Sized> SequenceDriver for FeedDriver<'_, S> {
    fn import_file(&mut self, file: &ImportFile, report: &mut ImportReport) -> Result<(), FeedError> {
        let Some(profile) = file.profile else {
            return Err(FeedError::File {
                file: file.name.clone(),
                message: format!("unknown profile {}", file.profile_name()),
            });
        };
        let table = read_csv_file(&file.path).map_err(|e| FeedError::Csv {
            file: file.name.clone(),
            message: format!("{e:#}"),
        })?;
        let mut rows = RowImporter {
            store: &mut *self.store,
            structure: &mut self.structure,
            ctx: &mut self.ctx,
            field_of_study: &self.field_of_study,
            resolver: self.resolver,
        };
        let imported = rows.import_table(profile, &file.name, &table, report)?;
        info!(file = %file.name, charset = table.charset, rows = imported, "file parsed");
        Ok(())
    }

    fn flush(&mut self, file: &ImportFile) -> Result<(), FeedError> {
        self.store.flush().map_err(|e| FeedError::File {
            file: file.name.clone(),
            message: format!("{e:#}"),
        })
    }

    fn finalize(&mut self) -> Result<(), FeedError> {
        self.store.restore_pre_deleted_users();
        self.store
            .tag_groups_with_structure_name(self.structure.external_id());
        self.store.persist().map_err(FeedError::store)?;
        info!(
            structure = self.structure.external_id(),
            students = self.ctx.known_students(),
            "import finalized"
        );
        Ok(())
    }
}
