//! Engine tuning captured for an experiment.
//!
//! `ExperimentConfig` is a value object: engines read it when they open, and
//! the setup table prints it. It never changes during a run.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BenchError;

/// Compaction style of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStyle {
    Level,
    Universal,
    Fifo,
}

impl CompactionStyle {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Universal => "universal",
            Self::Fifo => "fifo",
        }
    }
}

impl fmt::Display for CompactionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// File-picking priority for leveled compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPri {
    ByCompensatedSize,
    OldestLargestSeqFirst,
    OldestSmallestSeqFirst,
    MinOverlappingRatio,
}

impl CompactionPri {
    /// Short label that fits the setup table column.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ByCompensatedSize => "kByCS",
            Self::OldestLargestSeqFirst => "kOLSF",
            Self::OldestSmallestSeqFirst => "kOSSF",
            Self::MinOverlappingRatio => "kMOR",
        }
    }
}

impl fmt::Display for CompactionPri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Bloom,
    Ribbon,
}

/// Store-tuning parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub compaction_style: CompactionStyle,
    pub compaction_pri: CompactionPri,
    /// Size ratio between adjacent levels (T).
    pub size_ratio: u32,
    /// Pages per write buffer (P).
    pub buffer_size_in_pages: u64,
    /// Entries per page (B).
    pub entries_per_page: u64,
    /// Bytes per entry (E).
    pub entry_size: u64,
    pub level0_file_num_compaction_trigger: u32,
    pub level0_slowdown_writes_trigger: u32,
    pub level0_stop_writes_trigger: u32,
    /// Block cache size in MB; 0 disables the cache.
    pub block_cache_mb: u64,
    pub bits_per_key: f64,
    pub filter_type: FilterType,
    /// Ribbon filters fall back to Bloom below this level; -1 keeps ribbon
    /// everywhere.
    pub bloom_before_level: i32,
    pub direct_io: bool,
    pub compression: bool,
    pub cache_index_and_filter_blocks: bool,
    pub pin_l0_filter_and_index_blocks_in_cache: bool,
    pub pin_top_level_index_and_filter: bool,
    pub cache_index_and_filter_blocks_with_high_priority: bool,
    /// Overrides `target_file_size_base()` when set.
    pub target_file_size_override: Option<u64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            compaction_style: CompactionStyle::Level,
            compaction_pri: CompactionPri::MinOverlappingRatio,
            size_ratio: 10,
            buffer_size_in_pages: 4096,
            entries_per_page: 4,
            entry_size: 1024,
            level0_file_num_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 20,
            level0_stop_writes_trigger: 36,
            block_cache_mb: 8,
            bits_per_key: 10.0,
            filter_type: FilterType::Bloom,
            bloom_before_level: 0,
            direct_io: false,
            compression: true,
            cache_index_and_filter_blocks: false,
            pin_l0_filter_and_index_blocks_in_cache: false,
            pin_top_level_index_and_filter: true,
            cache_index_and_filter_blocks_with_high_priority: true,
            target_file_size_override: None,
        }
    }
}

impl ExperimentConfig {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, BenchError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BenchError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BenchError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self)
            .unwrap_or_else(|e| format!("# failed to serialize config: {}", e))
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.size_ratio < 2 {
            return Err(BenchError::InvalidConfig(format!(
                "size_ratio must be >= 2, got {}",
                self.size_ratio
            )));
        }
        if self.buffer_size_in_pages == 0 || self.entries_per_page == 0 || self.entry_size == 0 {
            return Err(BenchError::InvalidConfig(
                "buffer_size_in_pages, entries_per_page and entry_size must be > 0".into(),
            ));
        }
        if self.level0_file_num_compaction_trigger == 0 {
            return Err(BenchError::InvalidConfig(
                "level0_file_num_compaction_trigger must be > 0".into(),
            ));
        }
        if self.bloom_before_level < -1 {
            return Err(BenchError::InvalidConfig(format!(
                "bloom_before_level must be >= -1, got {}",
                self.bloom_before_level
            )));
        }
        if !(self.bits_per_key >= 0.0) {
            return Err(BenchError::InvalidConfig(format!(
                "bits_per_key must be >= 0, got {}",
                self.bits_per_key
            )));
        }
        Ok(())
    }

    /// Write buffer size in bytes (M = P * B * E).
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size_in_pages * self.entries_per_page * self.entry_size
    }

    pub fn target_file_size_base(&self) -> u64 {
        self.target_file_size_override
            .unwrap_or_else(|| self.buffer_size())
    }

    /// Capacity of level 1 (M * T).
    pub fn max_bytes_for_level_base(&self) -> u64 {
        self.buffer_size() * self.size_ratio as u64
    }

    /// Tuning used while bulk loading: no compression, huge files and
    /// buffers, and level-0 thresholds pushed out of the way.
    pub fn bulk_load_profile(&self) -> Self {
        const LOAD_FILE_SIZE: u64 = 1 << 30;
        let pages = (LOAD_FILE_SIZE / (self.entries_per_page * self.entry_size)).max(1);
        Self {
            compression: false,
            buffer_size_in_pages: pages.max(self.buffer_size_in_pages),
            target_file_size_override: Some(LOAD_FILE_SIZE),
            level0_file_num_compaction_trigger: self.level0_file_num_compaction_trigger.max(64),
            level0_slowdown_writes_trigger: self.level0_slowdown_writes_trigger.max(1 << 10),
            level0_stop_writes_trigger: self.level0_stop_writes_trigger.max(1 << 11),
            ..self.clone()
        }
    }
}

/// Render the fixed-width experiment setup table.
pub fn render_setup_table(config: &ExperimentConfig, workload_size: u64) -> String {
    const W: usize = 10;
    let mut out = String::new();
    out.push_str(&format!(
        "{:>W$}{:>W$}{:>4}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}\n",
        "cmpt_sty",
        "cmpt_pri",
        "T",
        "P",
        "B",
        "E",
        "M",
        "file_size",
        "L1_size",
        "blk_cch",
        "BPK",
        "WSZ",
    ));
    out.push_str(&format!(
        "{:>W$}{:>W$}{:>4}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}\n",
        config.compaction_style.label(),
        config.compaction_pri.label(),
        config.size_ratio,
        config.buffer_size_in_pages,
        config.entries_per_page,
        config.entry_size,
        config.buffer_size(),
        config.target_file_size_base(),
        config.max_bytes_for_level_base(),
        config.block_cache_mb,
        config.bits_per_key,
        workload_size,
    ));
    out
}
