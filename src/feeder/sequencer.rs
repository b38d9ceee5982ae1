use crate::feeder::error::FeedError;
use crate::feeder::profile::Profile;
use crate::feeder::report::ImportReport;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One `<Profile>.csv` file of a structure directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFile {
    pub path: PathBuf,
    pub name: String,
    pub profile: Option<Profile>,
}

impl ImportFile {
    pub fn new(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = name.strip_suffix(".csv").unwrap_or(&name);
        let profile = Profile::parse(stem);
        Self {
            path: path.to_path_buf(),
            name,
            profile,
        }
    }

    /// Profile name as derived from the file name.
    pub fn profile_name(&self) -> &str {
        self.name.strip_suffix(".csv").unwrap_or(&self.name)
    }
}

/// Lists the `.csv` files of a structure directory.
pub fn list_import_files(dir: &Path) -> anyhow::Result<Vec<ImportFile>> {
    let mut files = Vec::new();
    for ent in std::fs::read_dir(dir)? {
        let p = ent?.path();
        if !p.is_file() {
            continue;
        }
        if p.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(ImportFile::new(&p));
        }
    }
    Ok(files)
}

/// Producer profiles before the profiles that reference them; unknown profiles last.
pub fn order_files(files: &mut [ImportFile]) {
    files.sort_by(|a, b| {
        let ra = a.profile.map(Profile::import_rank).unwrap_or(u8::MAX);
        let rb = b.profile.map(Profile::import_rank).unwrap_or(u8::MAX);
        ra.cmp(&rb).then_with(|| a.name.cmp(&b.name))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Running(usize),
    Flushing(usize),
    Finalizing,
    Done,
    Failed,
}

/// Work done for each step of the chain.
pub trait SequenceDriver {
    fn import_file(&mut self, file: &ImportFile, report: &mut ImportReport) -> Result<(), FeedError>;
    fn flush(&mut self, file: &ImportFile) -> Result<(), FeedError>;
    fn finalize(&mut self) -> Result<(), FeedError>;
}

/// Imports files strictly one after another; file N+1 starts only after
/// file N has been flushed. The first failure stops the chain.
#[derive(Debug)]
pub struct FileSequencer {
    files: Vec<ImportFile>,
    state: SequencerState,
    failure: Option<FeedError>,
}

impl FileSequencer {
    pub fn new(mut files: Vec<ImportFile>) -> Self {
        order_files(&mut files);
        for file in &files {
            let Some(profile) = file.profile else {
                continue;
            };
            for dep in profile.depends_on() {
                if !files.iter().any(|f| f.profile == Some(*dep)) {
                    warn!(
                        file = %file.name,
                        missing = dep.name(),
                        "no producer file in this run; links resolve by explicit id only"
                    );
                }
            }
        }
        Self {
            files,
            state: SequencerState::Idle,
            failure: None,
        }
    }

    pub fn files(&self) -> &[ImportFile] {
        &self.files
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn run<D: SequenceDriver>(
        &mut self,
        driver: &mut D,
        report: &mut ImportReport,
    ) -> Result<(), FeedError> {
        match (self.state, &self.failure) {
            (SequencerState::Idle, _) => {}
            (SequencerState::Failed, Some(e)) => return Err(e.clone()),
            _ => return Ok(()),
        }
        for idx in 0..self.files.len() {
            let file = self.files[idx].clone();
            self.state = SequencerState::Running(idx);
            info!(file = %file.path.to_string_lossy(), "Parsing file");
            if let Err(e) = driver.import_file(&file, report) {
                return Err(self.fail(e, &file, report));
            }

            self.state = SequencerState::Flushing(idx);
            if let Err(e) = driver.flush(&file) {
                return Err(self.fail(e, &file, report));
            }
        }

        self.state = SequencerState::Finalizing;
        match driver.finalize() {
            Ok(()) => {
                self.state = SequencerState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = SequencerState::Failed;
                self.failure = Some(e.clone());
                error!(error = %e, "finalization failed");
                Err(e)
            }
        }
    }

    fn fail(&mut self, e: FeedError, file: &ImportFile, report: &mut ImportReport) -> FeedError {
        self.state = SequencerState::Failed;
        self.failure = Some(e.clone());
        error!(file = %file.name, error = %e, "file import aborted");
        report.add_error_with_params(&e.code(), &[&file.name]);
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> ImportFile {
        ImportFile::new(Path::new(&format!("/import/S1/{}", name)))
    }

    #[derive(Default)]
    struct Recording {
        calls: Vec<String>,
        fail_flush_of: Option<String>,
    }

    impl SequenceDriver for Recording {
        fn import_file(&mut self, file: &ImportFile, _report: &mut ImportReport) -> Result<(), FeedError> {
            self.calls.push(format!("import {}", file.name));
            Ok(())
        }

        fn flush(&mut self, file: &ImportFile) -> Result<(), FeedError> {
            self.calls.push(format!("flush {}", file.name));
            if self.fail_flush_of.as_deref() == Some(file.name.as_str()) {
                return Err(FeedError::File {
                    file: file.name.clone(),
                    message: "flush refused".into(),
                });
            }
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), FeedError> {
            self.calls.push("finalize".into());
            Ok(())
        }
    }

    #[test]
    fn student_file_runs_before_relative_file() {
        let s = FileSequencer::new(vec![
            file("Guest.csv"),
            file("Relative.csv"),
            file("Personnel.csv"),
            file("Student.csv"),
            file("Teacher.csv"),
        ]);
        let names: Vec<&str> = s.files().iter().map(|f| f.name.as_str()).collect();
        let student = names.iter().position(|n| *n == "Student.csv").expect("student");
        let relative = names.iter().position(|n| *n == "Relative.csv").expect("relative");
        assert!(student < relative);
        assert_eq!(names[0], "Teacher.csv");
    }

    #[test]
    fn unknown_profiles_go_last() {
        let s = FileSequencer::new(vec![file("Alumni.csv"), file("Student.csv")]);
        assert_eq!(s.files()[1].profile, None);
        assert_eq!(s.files()[1].profile_name(), "Alumni");
    }

    #[test]
    fn each_import_is_followed_by_its_flush_then_finalize() {
        let mut s = FileSequencer::new(vec![file("Relative.csv"), file("Student.csv")]);
        let mut d = Recording::default();
        let mut report = ImportReport::default();
        s.run(&mut d, &mut report).expect("run");
        assert_eq!(
            d.calls,
            vec![
                "import Student.csv",
                "flush Student.csv",
                "import Relative.csv",
                "flush Relative.csv",
                "finalize"
            ]
        );
        assert_eq!(s.state(), SequencerState::Done);
        assert!(!report.has_errors());

        s.run(&mut d, &mut report).expect("done stays done");
        assert_eq!(d.calls.len(), 5);
    }

    #[test]
    fn flush_failure_stops_chain_and_reports_file_error() {
        let mut s = FileSequencer::new(vec![
            file("Relative.csv"),
            file("Student.csv"),
            file("Teacher.csv"),
        ]);
        let mut d = Recording {
            fail_flush_of: Some("Student.csv".into()),
            ..Recording::default()
        };
        let mut report = ImportReport::default();
        let e = s.run(&mut d, &mut report).expect_err("must fail");
        assert_eq!(e.code(), "file.error");
        assert_eq!(s.state(), SequencerState::Failed);
        assert_eq!(
            d.calls,
            vec![
                "import Teacher.csv",
                "flush Teacher.csv",
                "import Student.csv",
                "flush Student.csv"
            ]
        );
        assert_eq!(report.errors[0].code, "file.error");
        assert_eq!(report.errors[0].params, vec!["Student.csv".to_string()]);

        // Failed is absorbing and keeps reporting the same failure.
        let again = s.run(&mut d, &mut report).expect_err("still failed");
        assert_eq!(again, e);
        assert_eq!(d.calls.len(), 4);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn empty_directory_goes_straight_to_finalize() {
        let mut s = FileSequencer::new(Vec::new());
        let mut d = Recording::default();
        s.run(&mut d, &mut ImportReport::default()).expect("run");
        assert_eq!(d.calls, vec!["finalize"]);
    }
}
