use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Demographics {
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub eye_color: Option<String>,
    pub eye_condition: Option<String>,
}

#[derive(Serialize)]
struct ParticipantInfo<'a> {
    experiment_name: &'a str,
    participant_id: &'a str,
    #[serde(flatten)]
    demographics: &'a Demographics,
}

/// Who is being recorded and where their files go. Read-only for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantContext {
    pub id: String,
    pub output_dir: PathBuf,
    pub demographics: Demographics,
}

impl ParticipantContext {
    /// Files live under `<data_dir>/<id>/`.
    pub fn new(id: impl Into<String>, data_dir: impl AsRef<Path>, demographics: Demographics) -> Self {
        let id = id.into();
        let output_dir = data_dir.as_ref().join(&id);
        Self {
            id,
            output_dir,
            demographics,
        }
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{suffix}", self.id))
    }

    pub fn info_path(&self) -> PathBuf {
        self.file("participant_info.json")
    }

    pub fn trial_order_path(&self) -> PathBuf {
        self.file("trial_order.jsonl")
    }

    pub fn outcomes_path(&self) -> PathBuf {
        self.file("outcomes.jsonl")
    }

    pub fn trace_path(&self) -> PathBuf {
        self.file("target_trace.jsonl")
    }

    /// Local copy of the tracker recording of session `session` (1-based).
    /// The first session is unnumbered, later ones carry `_s<N>`.
    pub fn session_data_path(&self, dummy: bool, session: u32) -> PathBuf {
        let stem = match session {
            0 | 1 => self.id.clone(),
            n => format!("{}_s{n}", self.id),
        };
        if dummy {
            self.output_dir.join(format!("{stem}_dummy.asc"))
        } else {
            self.output_dir.join(format!("{stem}.EDF"))
        }
    }

    /// First session data path not taken by an earlier session, so a resumed
    /// run never replaces the recording of the one before it.
    pub fn tracker_data_path(&self, dummy: bool) -> PathBuf {
        let mut session = 1;
        loop {
            let path = self.session_data_path(dummy, session);
            if !path.exists() {
                return path;
            }
            session += 1;
        }
    }

    /// Creates the output directory. A fresh run refuses to reuse an
    /// existing one; a resumed run requires it.
    pub fn prepare(&self, resume: bool) -> Result<()> {
        let exists = self.output_dir.exists();
        match (resume, exists) {
            (false, true) => Err(ExperimentError::io(
                &self.output_dir,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "participant directory already exists; pass --resume to continue it",
                ),
            )),
            (true, false) => Err(ExperimentError::io(
                &self.output_dir,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no participant directory to resume",
                ),
            )),
            _ => fs::create_dir_all(&self.output_dir)
                .map_err(|e| ExperimentError::io(&self.output_dir, e)),
        }
    }

    pub fn write_info(&self, experiment_name: &str) -> Result<()> {
        let path = self.info_path();
        let info = ParticipantInfo {
            experiment_name,
            participant_id: &self.id,
            demographics: &self.demographics,
        };
        let json = serde_json::to_string_pretty(&info)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| ExperimentError::io(&tmp, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| ExperimentError::io(&tmp, e))?;
            file.sync_all().map_err(|e| ExperimentError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| ExperimentError::io(&path, e))
    }

    /// Reads back demographics written by an earlier session.
    pub fn load_demographics(&mut self) -> Result<()> {
        #[derive(Deserialize)]
        struct Stored {
            #[serde(flatten)]
            demographics: Demographics,
        }
        let path = self.info_path();
        let text = fs::read_to_string(&path).map_err(|e| ExperimentError::io(&path, e))?;
        let stored: Stored = serde_json::from_str(&text)?;
        self.demographics = stored.demographics;
        Ok(())
    }
}
