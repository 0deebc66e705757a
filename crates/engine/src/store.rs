//! File-based screenshot store
//!
//! Screenshots, diff images and the report live in plain directories with
//! deterministic file names, so a later `after` run or a report renderer can
//! find them without any index.

use image::RgbaImage;
use sha2::{Digest, Sha256};
use shotline_common::naming::{self, DIFFERENCE_SUFFIX, PNG_EXTENSION};
use shotline_common::{Phase, Report, ScreenshotContext};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineResult;

pub const REPORT_FILE_NAME: &str = "report.json";

#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    screenshot_dir: PathBuf,
    report_dir: PathBuf,
}

impl ScreenshotStore {
    pub fn new(screenshot_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            screenshot_dir: screenshot_dir.into(),
            report_dir: report_dir.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.screenshot_path(), config.report_path())
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.screenshot_dir.join(file_name)
    }

    fn ensure_dirs(&self) -> EngineResult<()> {
        std::fs::create_dir_all(&self.screenshot_dir)?;
        std::fs::create_dir_all(&self.report_dir)?;
        Ok(())
    }

    /// Persist one frame, returning its file name
    pub fn write_frame(&self, context: &ScreenshotContext, vertical_offset: u64, image: &RgbaImage) -> EngineResult<String> {
        self.ensure_dirs()?;
        let file_name = context.file_name(vertical_offset);
        image.save_with_format(self.path_of(&file_name), image::ImageFormat::Png)?;
        debug!("Wrote {}", file_name);
        Ok(file_name)
    }

    pub fn write_diff(&self, file_name: &str, image: &RgbaImage) -> EngineResult<()> {
        self.ensure_dirs()?;
        image.save_with_format(self.path_of(file_name), image::ImageFormat::Png)?;
        Ok(())
    }

    /// Vertical offsets stored for a context in its phase
    pub fn offsets(&self, context: &ScreenshotContext) -> EngineResult<BTreeSet<u64>> {
        let prefix = naming::screenshot_prefix(&context.url, &context.path, context.window_width);
        let mut offsets = BTreeSet::new();

        if !self.screenshot_dir.exists() {
            return Ok(offsets);
        }

        for entry in std::fs::read_dir(&self.screenshot_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(offset) = naming::parse_offset(&name.to_string_lossy(), &prefix, context.phase) {
                offsets.insert(offset);
            }
        }

        Ok(offsets)
    }

    pub fn load(&self, file_name: &str) -> EngineResult<RgbaImage> {
        Ok(image::open(self.path_of(file_name))?.to_rgba8())
    }

    /// SHA-256 of a stored file, hex encoded
    pub fn file_hash(&self, file_name: &str) -> EngineResult<String> {
        let data = std::fs::read(self.path_of(file_name))?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Remove every stored screenshot and diff image
    pub fn clear(&self) -> EngineResult<usize> {
        self.remove_matching(|name| name.ends_with(&format!(".{}", PNG_EXTENSION)))
    }

    /// Remove the screenshots of one phase together with all diff images,
    /// which are stale once either side changes
    pub fn clear_phase(&self, phase: Phase) -> EngineResult<usize> {
        let phase_suffix = format!("_{}.{}", phase, PNG_EXTENSION);
        let diff_suffix = format!("_{}.{}", DIFFERENCE_SUFFIX, PNG_EXTENSION);
        self.remove_matching(|name| name.ends_with(&phase_suffix) || name.ends_with(&diff_suffix))
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> EngineResult<usize> {
        if !self.screenshot_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.screenshot_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && matches(&entry.file_name().to_string_lossy()) {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        debug!("Removed {} files from {}", removed, self.screenshot_dir.display());
        Ok(removed)
    }

    pub fn write_report(&self, report: &Report) -> EngineResult<PathBuf> {
        self.ensure_dirs()?;
        let path = self.report_dir.join(REPORT_FILE_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
        Ok(path)
    }

    pub fn read_report(&self) -> EngineResult<Report> {
        let content = std::fs::read_to_string(self.report_dir.join(REPORT_FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}
