//! The reader: open a file, describe it, hand out the decode engines.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vfx_core::{ChannelSet, ChannelTable, RecordingHost, Row};
//! use vfx_exr_reader::{ExrReader, ReaderConfig};
//!
//! let registry = ChannelTable::new();
//! let host = Arc::new(RecordingHost::new());
//! let reader = ExrReader::open("beauty.exr", ReaderConfig::from_env(), &registry, host);
//!
//! let bbox = reader.info().bbox;
//! let mut row = Row::new(bbox.x, bbox.r, &ChannelSet::rgba());
//! reader.engine(bbox.y, bbox.x, bbox.r, &ChannelSet::rgba(), &mut row);
//! ```

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use vfx_core::{Bounds, Box2i, Channel, ChannelRegistry, ChannelSet, DataType, Host, MetaBundle};

use crate::attribute::{AttributeValue, PixelType};
use crate::catalogue::{Catalogue, Layout, PartSummary};
use crate::chunk::ChunkSource;
use crate::colour::{ColourCurve, LINEAR};
use crate::config::ReaderConfig;
use crate::deep::{select_deep_part, DeepSetup};
use crate::error::{ReadError, ReadResult};
use crate::metadata::{publish_depth, publish_header, publish_views};
use crate::resolver::{ChannelMap, Resolver, Target, FULL_LAYER_NAMES};
use crate::stream::{select_kind, SourceStream};

/// Bytes read ahead to parse headers from.
const PREREAD: u64 = 64 * 1024;

/// What the reader tells the host after `open`.
#[derive(Debug, Clone, Default)]
pub struct ReaderInfo {
    /// Host bounding box, border included.
    pub bbox: Bounds,
    /// Host format (inclusive, origin at zero).
    pub format: Box2i,
    /// Pixel aspect ratio.
    pub pixel_aspect: f32,
    /// Host channels the file provides.
    pub channels: ChannelSet,
    /// Published metadata.
    pub metadata: MetaBundle,
    /// Transfer curve the pixel data is in.
    pub colour_curve: String,
    /// Per-part report.
    pub parts: Vec<PartSummary>,
    /// Views found in the file, hero first.
    pub views: Vec<String>,
    /// A channel matched the requested view exactly.
    pub stereo: bool,
    /// Pixels outside the data window read as black.
    pub black_outside: bool,
}

/// State of a successfully opened file.
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub(crate) catalogue: Catalogue,
    pub(crate) layout: Layout,
    pub(crate) channels: ChannelMap,
    pub(crate) deep: Option<DeepSetup>,
    pub(crate) source: ChunkSource,
}

/// Multi-part OpenEXR reader.
///
/// Opening never fails outright: a file that cannot be opened reports one
/// error to the host and yields a reader with an empty bounding box and no
/// channels. The engines are re-entrant and may run concurrently.
pub struct ExrReader {
    pub(crate) config: ReaderConfig,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) info: ReaderInfo,
    pub(crate) file: Option<OpenFile>,
    pub(crate) curve: Option<Arc<dyn ColourCurve>>,
    open_error: Option<ReadError>,
}

impl std::fmt::Debug for ExrReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExrReader")
            .field("config", &self.config)
            .field("info", &self.info)
            .field("file", &self.file)
            .field("open_error", &self.open_error)
            .finish_non_exhaustive()
    }
}

/// Reads the header prefix and parses the catalogue from it, continuing into
/// the file when the headers are longer than the prefix.
fn parse_path(path: &Path) -> ReadResult<(Catalogue, Vec<u8>)> {
    let mut file = File::open(path)?;
    let mut prefix = Vec::with_capacity(PREREAD as usize);
    (&mut file).take(PREREAD).read_to_end(&mut prefix)?;
    let catalogue = Catalogue::parse(Cursor::new(&prefix[..]).chain(file))?;
    Ok((catalogue, prefix))
}

impl ExrReader {
    /// Opens the file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        config: ReaderConfig,
        registry: &dyn ChannelRegistry,
        host: Arc<dyn Host>,
    ) -> Self {
        let path = path.as_ref();
        let opened = parse_path(path).and_then(|(catalogue, prefix)| {
            let kind = select_kind(config.file_read_mode, catalogue.first().compression);
            let stream = SourceStream::open(path, kind, &prefix)?;
            Self::assemble(catalogue, stream, Some(path), &config, registry, &host)
        });
        info!(path = %path.display(), ok = opened.is_ok(), "opened exr");
        Self::finish(opened, config, host)
    }

    /// Opens a file held in memory.
    pub fn from_bytes(
        bytes: Vec<u8>,
        config: ReaderConfig,
        registry: &dyn ChannelRegistry,
        host: Arc<dyn Host>,
    ) -> Self {
        let parsed = Catalogue::parse(Cursor::new(&bytes[..]));
        let opened = parsed.and_then(|catalogue| {
            let stream = SourceStream::from_bytes(bytes);
            Self::assemble(catalogue, stream, None, &config, registry, &host)
        });
        Self::finish(opened, config, host)
    }

    fn finish(opened: ReadResult<(ReaderInfo, OpenFile)>, config: ReaderConfig, host: Arc<dyn Host>) -> Self {
        match opened {
            Ok((info, file)) => Self { config, host, info, file: Some(file), curve: None, open_error: None },
            Err(err) => {
                warn!(error = %err, "exr open failed");
                host.error(&err.to_string());
                let info = ReaderInfo { colour_curve: LINEAR.to_string(), ..ReaderInfo::default() };
                Self { config, host, info, file: None, curve: None, open_error: Some(err) }
            }
        }
    }

    fn assemble(
        mut catalogue: Catalogue,
        mut stream: SourceStream,
        path: Option<&Path>,
        config: &ReaderConfig,
        registry: &dyn ChannelRegistry,
        host: &Arc<dyn Host>,
    ) -> ReadResult<(ReaderInfo, OpenFile)> {
        catalogue.read_offset_tables(&mut stream)?;
        let first = catalogue.first();
        let layout = Layout::derive(first, config.edge_mode, config.offset_negative_display_window);

        let mut metadata = MetaBundle::new();
        publish_header(first, &mut metadata, config.do_not_attach_prefix);
        publish_depth(&catalogue.parts, &mut metadata);
        publish_views(&catalogue.views, &mut metadata);

        let full_layer_names = match first.attribute(FULL_LAYER_NAMES) {
            Some(AttributeValue::Int(v)) => Some(*v as i64),
            _ => None,
        };
        let resolver = Resolver::new(config, registry, host.as_ref());
        let flat_parts = catalogue.parts.iter().enumerate().filter(|(_, p)| !p.part_type.is_deep()).map(|(i, _)| i);
        let channels = resolver.resolve(&catalogue, flat_parts, full_layer_names, Target::Flat)?;

        let deep = match select_deep_part(&catalogue, &config.view) {
            Some(part) => {
                let deep_channels = resolver.resolve(&catalogue, [part], full_layer_names, Target::Deep)?;
                Some(DeepSetup::new(&catalogue, &layout, part, deep_channels, config, &mut metadata))
            }
            None => None,
        };

        let mut mask = channels.mask().clone();
        if mask.is_empty() {
            if let Some(deep) = &deep {
                mask = deep.available.clone();
            }
        }

        let info = ReaderInfo {
            bbox: layout.bbox,
            format: layout.format,
            pixel_aspect: first.pixel_aspect,
            channels: mask,
            metadata,
            colour_curve: LINEAR.to_string(),
            parts: catalogue.summaries(&layout),
            views: catalogue.views.clone(),
            stereo: channels.is_stereo(),
            black_outside: layout.black_outside,
        };
        debug!(bbox = ?info.bbox, channels = info.channels.len(), parts = catalogue.parts.len(), "reader ready");

        let source = ChunkSource::new(stream, path.map(Path::to_path_buf), catalogue.is_multipart(), host.clone());
        Ok((info, OpenFile { catalogue, layout, channels, deep, source }))
    }

    /// Description published at open.
    pub fn info(&self) -> &ReaderInfo {
        &self.info
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Why opening failed, if it did.
    pub fn open_error(&self) -> Option<&ReadError> {
        self.open_error.as_ref()
    }

    /// `true` when the file was opened successfully.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Parsed headers.
    pub fn catalogue(&self) -> Option<&Catalogue> {
        self.file.as_ref().map(|f| &f.catalogue)
    }

    /// Host geometry.
    pub fn layout(&self) -> Option<&Layout> {
        self.file.as_ref().map(|f| &f.layout)
    }

    /// Flat channel map.
    pub fn channel_map(&self) -> Option<&ChannelMap> {
        self.file.as_ref().map(|f| &f.channels)
    }

    /// Installs the curve the host wants RGB converted with.
    pub fn set_colour_curve(&mut self, curve: Arc<dyn ColourCurve>) {
        self.curve = Some(curve);
    }

    /// Plane type for `channels`: the widest stored type, `F32 > U32 > F16`.
    pub fn plane_type(&self, channels: &ChannelSet) -> DataType {
        match self.channel_map().and_then(|m| m.widest_type(channels)) {
            Some(PixelType::Half) => DataType::F16,
            Some(PixelType::Uint) => DataType::U32,
            Some(PixelType::Float) | None => DataType::F32,
        }
    }

    /// Frees scratch, caches and the whole-file buffer. Returns the bytes
    /// freed immediately; scratch in use is freed by its last user.
    pub fn reclaim(&self) -> usize {
        self.file.as_ref().map(|f| f.source.reclaim()).unwrap_or(0)
    }

    pub(crate) fn opened(&self) -> ReadResult<&OpenFile> {
        self.file
            .as_ref()
            .ok_or_else(|| ReadError::Malformed("reader has no open file".into()))
    }

    /// Reports a decode error to the host. Aborts are silent.
    pub(crate) fn report(&self, result: ReadResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) if err.is_abort() => false,
            Err(err) => {
                warn!(error = %err, "decode failed");
                self.host.error(&err.to_string());
                false
            }
        }
    }

    /// Whether a missing alpha should be filled for this request.
    pub(crate) fn fills_alpha(&self, map: &ChannelMap, channels: &ChannelSet) -> bool {
        self.config.auto_alpha
            && channels.contains(Channel::ALPHA)
            && map.get(Channel::ALPHA).is_none()
            && [Channel::RED, Channel::GREEN, Channel::BLUE].iter().any(|&c| map.get(c).is_some())
    }
}
