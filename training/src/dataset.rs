//! Dataset discovery and sample assembly.
//!
//! Expected layout under the dataset root:
//!
//! ```text
//! <root>/patient_<id>/patient_<id>_record/
//!     <prefix>_<id>_<L|R>.mp4          one or more clips
//!     clinical_data.json               clinical record
//!     covid_classification.json        optional {"Covid_test_result": "Positive"}
//! ```
//!
//! Scanning only indexes paths. Videos, clinical records, and labels are read
//! on every [`DatasetIndex::get`], so no tensors are cached between epochs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lungfusion_core::{
    ClinicalRecord, ClinicalVector, CovidStatus, DataConfig, LungFusionError, MissingLabelPolicy,
    PatientId, Result, ScanSide,
};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::video::{VideoClip, VideoDecoder, VideoSampler};

pub const CLINICAL_FILE: &str = "clinical_data.json";
pub const LABEL_FILE: &str = "covid_classification.json";
const RECORD_DIR_SUFFIX: &str = "_record";

/// Label value that maps to [`CovidStatus::Positive`], compared case-insensitively.
const POSITIVE_LABEL: &str = "positive";

// ---------------------------------------------------------------------------
// Index types
// ---------------------------------------------------------------------------

/// Everything known about one patient after scanning.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient_id: PatientId,
    pub record_dir: PathBuf,
    pub clinical_path: PathBuf,
    /// Present only when the classification artifact exists on disk.
    pub label_path: Option<PathBuf>,
}

/// One video clip; the unit of training.
#[derive(Debug, Clone)]
pub struct ClipEntry {
    pub video_path: PathBuf,
    pub side: ScanSide,
    /// Index into [`DatasetIndex::records`].
    pub record: usize,
}

/// A fully loaded sample.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub clip: VideoClip,
    pub clinical: ClinicalVector,
    pub label: CovidStatus,
    pub patient_id: PatientId,
}

/// Counts reported by `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub clips: usize,
    pub patients: usize,
    pub labeled_patients: usize,
    pub left_clips: usize,
    pub right_clips: usize,
    pub unspecified_clips: usize,
    pub excluded_patients: usize,
}

#[derive(Debug, Deserialize)]
struct LabelArtifact {
    #[serde(rename = "Covid_test_result")]
    covid_test_result: String,
}

// ---------------------------------------------------------------------------
// DatasetIndex
// ---------------------------------------------------------------------------

/// Indexed dataset of (clip, clinical vector, label) samples.
pub struct DatasetIndex {
    root: PathBuf,
    records: Vec<PatientRecord>,
    clips: Vec<ClipEntry>,
    excluded_patients: usize,
    sampler: VideoSampler,
    decoder: Arc<dyn VideoDecoder>,
    missing_label: MissingLabelPolicy,
}

impl DatasetIndex {
    /// Walk `root` for `*_record` directories and index every video inside.
    ///
    /// # Errors
    ///
    /// [`LungFusionError::Dataset`] when `root` is not a readable directory.
    pub fn scan(root: &Path, config: &DataConfig, decoder: Arc<dyn VideoDecoder>) -> Result<Self> {
        Self::scan_with_policy(root, config, config.missing_label, decoder)
    }

    /// Index an evaluation set. Every patient is kept: `Exclude` falls back
    /// to the default placeholder class.
    pub fn scan_for_evaluation(
        root: &Path,
        config: &DataConfig,
        decoder: Arc<dyn VideoDecoder>,
    ) -> Result<Self> {
        let policy = match config.missing_label {
            MissingLabelPolicy::Exclude => MissingLabelPolicy::default(),
            policy => policy,
        };
        Self::scan_with_policy(root, config, policy, decoder)
    }

    fn scan_with_policy(
        root: &Path,
        config: &DataConfig,
        missing_label: MissingLabelPolicy,
        decoder: Arc<dyn VideoDecoder>,
    ) -> Result<Self> {
        if !root.is_dir() {
            return Err(LungFusionError::Dataset(format!(
                "dataset root {} is not a directory",
                root.display()
            )));
        }

        let mut by_patient: BTreeMap<PatientId, usize> = BTreeMap::new();
        let mut records: Vec<PatientRecord> = Vec::new();
        let mut clips: Vec<ClipEntry> = Vec::new();
        let mut excluded: BTreeSet<PatientId> = BTreeSet::new();

        for record_dir in find_record_dirs(root)? {
            for video_path in find_videos(&record_dir, &config.video_extension)? {
                let Some((patient_id, side)) = video_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(parse_video_stem)
                else {
                    tracing::warn!(path = %video_path.display(), "Skipping video with unparseable name");
                    continue;
                };

                if excluded.contains(&patient_id) {
                    continue;
                }

                let record = match by_patient.get(&patient_id) {
                    Some(&idx) => idx,
                    None => {
                        let record = PatientRecord::locate(root, &patient_id);
                        if record.label_path.is_none() {
                            match missing_label {
                                MissingLabelPolicy::Exclude => {
                                    tracing::info!(patient = %patient_id, "Excluding unlabeled patient");
                                    excluded.insert(patient_id);
                                    continue;
                                }
                                MissingLabelPolicy::Default { class } => {
                                    tracing::warn!(
                                        patient = %patient_id,
                                        assigned = %class,
                                        "No classification artifact; assigning placeholder label"
                                    );
                                }
                            }
                        }
                        records.push(record);
                        by_patient.insert(patient_id, records.len() - 1);
                        records.len() - 1
                    }
                };

                clips.push(ClipEntry {
                    video_path,
                    side,
                    record,
                });
            }
        }

        tracing::info!(
            root = %root.display(),
            clips = clips.len(),
            patients = records.len(),
            excluded = excluded.len(),
            "Dataset indexed"
        );

        Ok(Self {
            root: root.to_path_buf(),
            records,
            clips,
            excluded_patients: excluded.len(),
            sampler: VideoSampler::from_config(config),
            decoder,
            missing_label,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of clips.
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn clips(&self) -> &[ClipEntry] {
        &self.clips
    }

    pub fn records(&self) -> &[PatientRecord] {
        &self.records
    }

    /// Patient owning clip `index`.
    pub fn patient_of(&self, index: usize) -> Option<&PatientId> {
        self.clips
            .get(index)
            .map(|clip| &self.records[clip.record].patient_id)
    }

    pub fn summary(&self) -> DatasetSummary {
        let mut summary = DatasetSummary {
            clips: self.clips.len(),
            patients: self.records.len(),
            labeled_patients: self.records.iter().filter(|r| r.label_path.is_some()).count(),
            excluded_patients: self.excluded_patients,
            ..DatasetSummary::default()
        };
        for clip in &self.clips {
            match clip.side {
                ScanSide::Left => summary.left_clips += 1,
                ScanSide::Right => summary.right_clips += 1,
                ScanSide::Unspecified => summary.unspecified_clips += 1,
            }
        }
        summary
    }

    /// Load clip `index`: decode and sample the video, vectorize the clinical
    /// record, and resolve the label.
    pub fn get(&self, index: usize) -> Result<TrainingExample> {
        let entry = self.clips.get(index).ok_or_else(|| {
            LungFusionError::Dataset(format!(
                "clip index {index} out of range ({} clips)",
                self.clips.len()
            ))
        })?;
        let record = &self.records[entry.record];

        let mut source = self.decoder.open(&entry.video_path)?;
        let clip = self.sampler.sample(source.as_mut(), &entry.video_path)?;
        let clinical = record.load_clinical()?;
        let label = record.load_label(self.missing_label)?;

        Ok(TrainingExample {
            clip,
            clinical,
            label,
            patient_id: record.patient_id.clone(),
        })
    }
}

impl PatientRecord {
    fn locate(root: &Path, patient_id: &PatientId) -> Self {
        let record_dir = root
            .join(format!("patient_{patient_id}"))
            .join(format!("patient_{patient_id}{RECORD_DIR_SUFFIX}"));
        let label = record_dir.join(LABEL_FILE);
        Self {
            patient_id: patient_id.clone(),
            clinical_path: record_dir.join(CLINICAL_FILE),
            label_path: label.is_file().then_some(label),
            record_dir,
        }
    }

    fn load_clinical(&self) -> Result<ClinicalVector> {
        let raw = std::fs::read_to_string(&self.clinical_path).map_err(|e| {
            LungFusionError::Dataset(format!(
                "Failed to read clinical record {}: {e}",
                self.clinical_path.display()
            ))
        })?;
        let record = ClinicalRecord::from_json_str(&raw).map_err(|e| {
            LungFusionError::Dataset(format!(
                "Failed to parse clinical record {}: {e}",
                self.clinical_path.display()
            ))
        })?;
        Ok(record.vectorize())
    }

    fn load_label(&self, policy: MissingLabelPolicy) -> Result<CovidStatus> {
        let Some(path) = &self.label_path else {
            return Ok(match policy {
                MissingLabelPolicy::Default { class } => class,
                MissingLabelPolicy::Exclude => CovidStatus::Negative,
            });
        };
        let label_error = |reason: String| LungFusionError::Label {
            path: path.clone(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| label_error(e.to_string()))?;
        let artifact: LabelArtifact =
            serde_json::from_str(&raw).map_err(|e| label_error(e.to_string()))?;
        Ok(parse_label(&artifact.covid_test_result))
    }
}

// ---------------------------------------------------------------------------
// Discovery helpers
// ---------------------------------------------------------------------------

/// `Positive` (any case, surrounding whitespace ignored) is the positive
/// class; every other value is negative.
pub fn parse_label(value: &str) -> CovidStatus {
    if value.trim().eq_ignore_ascii_case(POSITIVE_LABEL) {
        CovidStatus::Positive
    } else {
        CovidStatus::Negative
    }
}

/// Patient id is the second-to-last `_`-separated token of the file stem; the
/// last token is the scan side.
pub fn parse_video_stem(stem: &str) -> Option<(PatientId, ScanSide)> {
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < 2 {
        return None;
    }
    let id = tokens[tokens.len() - 2];
    if id.is_empty() {
        return None;
    }
    Some((PatientId::new(id), ScanSide::from_tag(tokens[tokens.len() - 1])))
}

/// Directories named `*_record` at least two levels below `root`.
fn find_record_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|e| LungFusionError::Dataset(format!("walk failed: {e}")))?;
        if entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(RECORD_DIR_SUFFIX))
        {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Video files anywhere below a record directory, sorted by path.
fn find_videos(record_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in WalkDir::new(record_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| LungFusionError::Dataset(format!("walk failed: {e}")))?;
        let matches = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches {
            videos.push(entry.into_path());
        }
    }
    Ok(videos)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::FrameSource;
    use image::{Rgb, RgbImage};

    /// Number of frames is the file length in bytes.
    struct LengthDecoder;

    struct SolidFrames(usize);

    impl FrameSource for SolidFrames {
        fn frame_count_hint(&self) -> Option<usize> {
            Some(self.0)
        }
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(RgbImage::from_pixel(4, 4, Rgb([128, 128, 128]))))
        }
    }

    impl VideoDecoder for LengthDecoder {
        fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            let len = std::fs::metadata(path)?.len() as usize;
            Ok(Box::new(SolidFrames(len)))
        }
    }

    fn test_config() -> DataConfig {
        DataConfig {
            frame_count: 3,
            frame_height: 4,
            frame_width: 4,
            ..DataConfig::default()
        }
    }

    fn write_patient(root: &Path, id: &str, sides: &[&str], label: Option<&str>) {
        let dir = root
            .join(format!("patient_{id}"))
            .join(format!("patient_{id}_record"));
        std::fs::create_dir_all(&dir).unwrap();
        for side in sides {
            std::fs::write(dir.join(format!("scan_{id}_{side}.mp4")), b"12345").unwrap();
        }
        std::fs::write(
            dir.join(CLINICAL_FILE),
            r#"{"patient_info": {"age": 60, "sex": "M"}}"#,
        )
        .unwrap();
        if let Some(label) = label {
            std::fs::write(
                dir.join(LABEL_FILE),
                format!(r#"{{"Covid_test_result": "{label}"}}"#),
            )
            .unwrap();
        }
    }

    fn scan(root: &Path, config: &DataConfig) -> DatasetIndex {
        DatasetIndex::scan(root, config, Arc::new(LengthDecoder)).unwrap()
    }

    #[test]
    fn test_parse_video_stem() {
        let (id, side) = parse_video_stem("lus_0042_L").unwrap();
        assert_eq!(id.as_str(), "0042");
        assert_eq!(side, ScanSide::Left);

        let (id, side) = parse_video_stem("a_b_7_R").unwrap();
        assert_eq!(id.as_str(), "7");
        assert_eq!(side, ScanSide::Right);

        let (_, side) = parse_video_stem("x_9_extra").unwrap();
        assert_eq!(side, ScanSide::Unspecified);

        assert!(parse_video_stem("single").is_none());
        assert!(parse_video_stem("_L").is_none());
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("Positive"), CovidStatus::Positive);
        assert_eq!(parse_label("Negative"), CovidStatus::Negative);
        assert_eq!(parse_label("Inconclusive"), CovidStatus::Negative);
        assert_eq!(parse_label(" positive\n"), CovidStatus::Positive);
        assert_eq!(parse_label(""), CovidStatus::Negative);
    }

    #[test]
    fn test_scan_counts_clips_not_patients() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L", "R"], Some("Positive"));
        write_patient(dir.path(), "2", &["L"], Some("Negative"));

        let index = scan(dir.path(), &test_config());
        assert_eq!(index.len(), 3);
        assert_eq!(index.records().len(), 2);
        assert_eq!(index.patient_of(0).unwrap().as_str(), "1");
        assert_eq!(index.patient_of(1).unwrap().as_str(), "1");
        assert_eq!(index.patient_of(2).unwrap().as_str(), "2");
        assert!(index.patient_of(3).is_none());

        let summary = index.summary();
        assert_eq!(summary.left_clips, 2);
        assert_eq!(summary.right_clips, 1);
        assert_eq!(summary.labeled_patients, 2);
    }

    #[test]
    fn test_get_loads_sample() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L"], Some("Positive"));

        let index = scan(dir.path(), &test_config());
        let example = index.get(0).unwrap();
        assert_eq!(example.label, CovidStatus::Positive);
        assert_eq!(example.patient_id.as_str(), "1");
        assert_eq!(example.clip.len(), 3);
        assert_eq!(example.clinical.as_slice()[0], 60.0);
        assert!(matches!(index.get(5), Err(LungFusionError::Dataset(_))));
    }

    #[test]
    fn test_missing_label_uses_configured_default() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L"], None);

        let config = DataConfig {
            missing_label: MissingLabelPolicy::Default {
                class: CovidStatus::Positive,
            },
            ..test_config()
        };
        let index = scan(dir.path(), &config);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(0).unwrap().label, CovidStatus::Positive);
    }

    #[test]
    fn test_missing_label_exclude_drops_patient() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L", "R"], None);
        write_patient(dir.path(), "2", &["L"], Some("Negative"));

        let config = DataConfig {
            missing_label: MissingLabelPolicy::Exclude,
            ..test_config()
        };
        let index = scan(dir.path(), &config);
        assert_eq!(index.len(), 1);
        assert_eq!(index.patient_of(0).unwrap().as_str(), "2");
        assert_eq!(index.summary().excluded_patients, 1);
    }

    #[test]
    fn test_evaluation_scan_keeps_unlabeled_patients() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L", "R"], None);
        write_patient(dir.path(), "2", &["L"], Some("Positive"));

        let config = DataConfig {
            missing_label: MissingLabelPolicy::Exclude,
            ..test_config()
        };
        let index =
            DatasetIndex::scan_for_evaluation(dir.path(), &config, Arc::new(LengthDecoder)).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.summary().excluded_patients, 0);
        assert_eq!(index.get(0).unwrap().label, CovidStatus::Negative);
        assert_eq!(index.get(2).unwrap().label, CovidStatus::Positive);
    }

    #[test]
    fn test_malformed_label_is_label_error() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L"], Some("Positive"));
        let label = dir
            .path()
            .join("patient_1/patient_1_record")
            .join(LABEL_FILE);
        std::fs::write(&label, "{not json").unwrap();

        let index = scan(dir.path(), &test_config());
        assert!(matches!(index.get(0), Err(LungFusionError::Label { .. })));
    }

    #[test]
    fn test_empty_video_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L"], Some("Positive"));
        let video = dir.path().join("patient_1/patient_1_record/scan_1_L.mp4");
        std::fs::write(&video, b"").unwrap();

        let index = scan(dir.path(), &test_config());
        assert!(matches!(index.get(0), Err(LungFusionError::Decode { .. })));
    }

    #[test]
    fn test_non_matching_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_patient(dir.path(), "1", &["L"], Some("Positive"));
        let record = dir.path().join("patient_1/patient_1_record");
        std::fs::write(record.join("notes.txt"), b"ignored").unwrap();
        // A record directory directly under the root is too shallow.
        std::fs::create_dir_all(dir.path().join("top_record")).unwrap();
        std::fs::write(dir.path().join("top_record/scan_9_L.mp4"), b"1").unwrap();

        let index = scan(dir.path(), &test_config());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let result = DatasetIndex::scan(
            Path::new("/nonexistent/dataset"),
            &test_config(),
            Arc::new(LengthDecoder),
        );
        assert!(matches!(result, Err(LungFusionError::Dataset(_))));
    }
}
