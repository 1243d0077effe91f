//! Reader configuration.
//!
//! [`ReaderConfig`] is the record the host fills in before opening a file.
//! A few switches can also come from the environment; those are read once
//! per process and overlaid by [`ReaderConfig::from_env`]:
//!
//! | variable | effect |
//! |---|---|
//! | `FN_EXR_FILE_READ_MODE` | `normal`, `mmap`, `buffer` or `default` (case-insensitive) |
//! | `NUKE_EXR_NEVER_PLANAR` | any value forces the per-line path |
//! | `NUKE_EXR_CHAN_ERROR` | `1` turns the channel ceiling into an error |
//! | `NUKE_EXR_DISABLE_THREADED_FILL` | any value clears planes on the calling thread |

use std::sync::OnceLock;

use tracing::{debug, warn};

/// Environment tag overriding the source stream selection.
pub const ENV_FILE_READ_MODE: &str = "FN_EXR_FILE_READ_MODE";
/// Environment tag forcing the per-line path.
pub const ENV_NEVER_PLANAR: &str = "NUKE_EXR_NEVER_PLANAR";
/// Environment tag making the channel ceiling fatal.
pub const ENV_CHANNEL_ERROR: &str = "NUKE_EXR_CHAN_ERROR";
/// Environment tag disabling threaded plane clears.
pub const ENV_DISABLE_THREADED_FILL: &str = "NUKE_EXR_DISABLE_THREADED_FILL";

/// How pixels outside the data window are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeMode {
    /// Black border unless data and display windows match exactly.
    #[default]
    Plate,
    /// Black border only on sides where data and display differ.
    Edge,
    /// No border; the host repeats edge pixels.
    Repeat,
    /// Always a black border.
    Black,
}

impl EdgeMode {
    /// Parses the labels used on the command line (`plate`, `edge`, `repeat`, `black`).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "plate" | "plate detect" => Some(EdgeMode::Plate),
            "edge" | "edge detect" => Some(EdgeMode::Edge),
            "repeat" => Some(EdgeMode::Repeat),
            "black" => Some(EdgeMode::Black),
            _ => None,
        }
    }
}

/// Which source stream realisation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileReadMode {
    /// Decide from the file's compression.
    #[default]
    Default,
    /// Streamed reads from the file handle.
    Normal,
    /// Memory-mapped file.
    Mmap,
    /// Whole file read into one buffer.
    Buffer,
}

impl FileReadMode {
    /// Parses an environment value, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(FileReadMode::Normal),
            "mmap" => Some(FileReadMode::Mmap),
            "buffer" => Some(FileReadMode::Buffer),
            "default" => Some(FileReadMode::Default),
            _ => None,
        }
    }
}

/// Options recorded once per process from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvOverrides {
    /// `FN_EXR_FILE_READ_MODE`, when present and valid.
    pub file_read_mode: Option<FileReadMode>,
    /// `NUKE_EXR_NEVER_PLANAR` is set.
    pub never_planar: bool,
    /// `NUKE_EXR_CHAN_ERROR=1`.
    pub channel_error: bool,
    /// `NUKE_EXR_DISABLE_THREADED_FILL` is set.
    pub disable_threaded_fill: bool,
}

impl EnvOverrides {
    fn capture() -> Self {
        let file_read_mode = std::env::var(ENV_FILE_READ_MODE).ok().and_then(|value| {
            let mode = FileReadMode::parse(&value);
            match mode {
                Some(mode) => debug!(%value, ?mode, "{ENV_FILE_READ_MODE}: using specified mode"),
                None => warn!(
                    %value,
                    "{ENV_FILE_READ_MODE}: invalid mode, using default (valid: normal, mmap, buffer, default)"
                ),
            }
            mode
        });

        Self {
            file_read_mode,
            never_planar: std::env::var_os(ENV_NEVER_PLANAR).is_some(),
            channel_error: std::env::var(ENV_CHANNEL_ERROR).is_ok_and(|v| v.trim() == "1"),
            disable_threaded_fill: std::env::var_os(ENV_DISABLE_THREADED_FILL).is_some(),
        }
    }

    /// Process-wide snapshot, taken on first use.
    pub fn get() -> &'static EnvOverrides {
        static OVERRIDES: OnceLock<EnvOverrides> = OnceLock::new();
        OVERRIDES.get_or_init(Self::capture)
    }
}

/// Configuration record consumed by the reader.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Shift a display window whose min-x is not zero so it starts at the origin.
    pub offset_negative_display_window: bool,
    /// Publish metadata keys without the `exr/` prefix.
    pub do_not_attach_prefix: bool,
    /// Border policy for pixels outside the data window.
    pub edge_mode: EdgeMode,
    /// Force the per-channel layer convention in multi-part files.
    pub always_ignore_part_names: bool,
    /// Source stream selection.
    pub file_read_mode: FileReadMode,
    /// Never take the planar path.
    pub never_planar: bool,
    /// Crossing the channel ceiling is an error rather than a dropped channel.
    pub channel_ceiling_is_error: bool,
    /// Clear planes across the rayon pool.
    pub threaded_fill: bool,
    /// View requested by the host (`"main"` when the host is not multi-view).
    pub view: String,
    /// Host wants raw data: no `Y` expansion to green/blue, no colour curve.
    pub raw: bool,
    /// Fill a requested-but-missing alpha with the type maximum.
    pub auto_alpha: bool,
    /// Distinct channels after which a single warning is emitted.
    pub channel_warning_threshold: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            offset_negative_display_window: true,
            do_not_attach_prefix: false,
            edge_mode: EdgeMode::Plate,
            always_ignore_part_names: false,
            file_read_mode: FileReadMode::Default,
            never_planar: false,
            channel_ceiling_is_error: false,
            threaded_fill: true,
            view: "main".to_string(),
            raw: false,
            auto_alpha: true,
            channel_warning_threshold: 768,
        }
    }
}

impl ReaderConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env(EnvOverrides::get())
    }

    /// Overlays environment overrides onto this record.
    pub fn with_env(mut self, env: &EnvOverrides) -> Self {
        if let Some(mode) = env.file_read_mode {
            self.file_read_mode = mode;
        }
        self.never_planar |= env.never_planar;
        self.channel_ceiling_is_error |= env.channel_error;
        if env.disable_threaded_fill {
            self.threaded_fill = false;
        }
        self
    }

    /// Sets the requested view.
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = view.into();
        self
    }

    /// Sets the edge mode.
    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    /// Sets the display-window offset policy.
    pub fn with_offset_negative_display_window(mut self, on: bool) -> Self {
        self.offset_negative_display_window = on;
        self
    }

    /// Sets the file read mode.
    pub fn with_file_read_mode(mut self, mode: FileReadMode) -> Self {
        self.file_read_mode = mode;
        self
    }

    /// Forces (or allows) the per-line path.
    pub fn with_never_planar(mut self, on: bool) -> Self {
        self.never_planar = on;
        self
    }

    /// Requests raw data.
    pub fn with_raw(mut self, on: bool) -> Self {
        self.raw = on;
        self
    }

    /// Forces the per-channel layer convention.
    pub fn with_ignore_part_names(mut self, on: bool) -> Self {
        self.always_ignore_part_names = on;
        self
    }

    /// Suppresses the metadata prefix.
    pub fn with_no_prefix(mut self, on: bool) -> Self {
        self.do_not_attach_prefix = on;
        self
    }
}
