use super::VideoSource;
use crate::error::{FrameError, SourceError};
use crate::pipeline::types::FrameSize;
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::ffi;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

// ---------------------------------------------------------------------------
// FfmpegReader
// ---------------------------------------------------------------------------

/// One decoder instance. Stateful, so concurrent extractions each borrow their own.
struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Seconds per stream timestamp tick.
    time_base: f64,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    source_fps: f64,
    duration_secs: f64,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
}

// SAFETY: a reader is only ever used by the thread that borrowed it from the pool.
// The raw pointers inside ffmpeg-next types are not shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    fn open(path: &Path) -> Result<Self, SourceError> {
        ffmpeg_next::init()
            .map_err(|e| SourceError::Unsupported(format!("Failed to initialize FFmpeg: {}", e)))?;

        let input_ctx = ffmpeg_next::format::input(&path).map_err(|e| {
            SourceError::UnreadableMetadata(format!("{}: {}", path.display(), e))
        })?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| SourceError::NoVideoTrack(path.display().to_string()))?;

        let video_stream_index = video_stream.index();

        let rational_fps = video_stream.avg_frame_rate();
        let source_fps = if rational_fps.denominator() > 0 {
            rational_fps.numerator() as f64 / rational_fps.denominator() as f64
        } else {
            0.0
        };

        let tb = video_stream.time_base();
        let time_base = if tb.denominator() > 0 {
            tb.numerator() as f64 / tb.denominator() as f64
        } else {
            0.0
        };

        let duration_secs = input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64;

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .map_err(|e| {
                    SourceError::UnreadableMetadata(format!("decoder context: {}", e))
                })?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| SourceError::UnreadableMetadata(format!("video decoder: {}", e)))?;

        let width = decoder.width();
        let height = decoder.height();

        tracing::debug!(
            "FfmpegReader: opened {}, duration={:.2}s, fps={:.2}, size={}x{}",
            path.display(),
            duration_secs,
            source_fps,
            width,
            height
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            time_base,
            scaler: None,
            width,
            height,
            source_fps,
            duration_secs,
            eof_sent: false,
        })
    }

    fn seek(&mut self, timestamp: f64) -> Result<()> {
        let target = (timestamp * ffi::AV_TIME_BASE as f64) as i64;
        self.input_ctx
            .seek(target, ..target)
            .context("Failed to seek")?;
        self.decoder.flush();
        self.eof_sent = false;
        Ok(())
    }

    /// Retrieve the next decoded frame, feeding packets as needed.
    fn decode_next(&mut self) -> Result<ffmpeg_next::util::frame::Video> {
        let mut frame = ffmpeg_next::util::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => return Ok(frame),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Err(anyhow!("End of stream"));
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Err(anyhow!("End of stream")),
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            let mut found_packet = false;
            while packet.read(&mut self.input_ctx).is_ok() {
                if packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    /// Decode the first frame presented at or after `timestamp`.
    fn read_at(&mut self, timestamp: f64) -> Result<RgbImage> {
        self.seek(timestamp)?;
        let half_frame = if self.source_fps > 0.0 {
            0.5 / self.source_fps
        } else {
            0.0
        };

        loop {
            let frame = self.decode_next()?;
            let presented = frame
                .timestamp()
                .map(|pts| pts as f64 * self.time_base)
                .unwrap_or(timestamp);
            if presented + half_frame >= timestamp {
                return self.to_rgb_image(&frame);
            }
        }
    }

    fn to_rgb_image(&mut self, frame: &ffmpeg_next::util::frame::Video) -> Result<RgbImage> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                frame.format(),
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::RGB24,
                self.width,
                self.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow!("scaler missing"))?;

        let mut rgb = ffmpeg_next::util::frame::Video::empty();
        scaler.run(frame, &mut rgb).context("Scaler failed")?;

        rgb_frame_to_image(&rgb)
    }
}

/// Copy an RGB24 frame row by row, dropping the stride padding.
fn rgb_frame_to_image(frame: &ffmpeg_next::util::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let data = frame.data(0);
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;

    let mut buffer = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let src_offset = y * stride;
        buffer.extend_from_slice(&data[src_offset..src_offset + row_bytes]);
    }

    RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create image buffer from frame data"))
}

// ---------------------------------------------------------------------------
// FfmpegSource
// ---------------------------------------------------------------------------

/// Video file decoded with FFmpeg. Keeps a small pool of readers so overlapping
/// extractions don't fight over decoder state.
pub struct FfmpegSource {
    path: PathBuf,
    duration_secs: f64,
    source_fps: f64,
    size: FrameSize,
    pool: Mutex<Vec<FfmpegReader>>,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let reader = FfmpegReader::open(path)?;
        tracing::info!(
            "FfmpegSource: opened {}, duration={:.2}s, fps={:.2}, size={}x{}",
            path.display(),
            reader.duration_secs,
            reader.source_fps,
            reader.width,
            reader.height
        );

        Ok(Self {
            path: path.to_path_buf(),
            duration_secs: reader.duration_secs,
            source_fps: reader.source_fps,
            size: FrameSize::new(reader.width, reader.height),
            pool: Mutex::new(vec![reader]),
        })
    }

    fn checkout(&self) -> Result<FfmpegReader, SourceError> {
        let pooled = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(reader) => Ok(reader),
            None => FfmpegReader::open(&self.path),
        }
    }

    fn checkin(&self, reader: FfmpegReader) {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reader);
    }
}

impl VideoSource for FfmpegSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn duration(&self) -> Result<f64, SourceError> {
        Ok(self.duration_secs)
    }

    fn nominal_frame_rate(&self) -> Result<f64, SourceError> {
        Ok(self.source_fps)
    }

    fn native_frame_size(&self) -> Result<FrameSize, SourceError> {
        Ok(self.size)
    }

    fn extract_frame(&self, timestamp: f64) -> Result<RgbImage, FrameError> {
        let mut reader = self
            .checkout()
            .map_err(|e| FrameError::decode(timestamp, e))?;

        match reader.read_at(timestamp) {
            Ok(image) => {
                self.checkin(reader);
                Ok(image)
            }
            // A failed reader may be mid-stream in an odd state; let it drop
            Err(e) => Err(FrameError::decode(timestamp, format!("{:#}", e))),
        }
    }
}
