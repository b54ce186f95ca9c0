//! Local video file decoding with FFmpeg.
//!
//! Frames are converted to RGB24 in memory. Timestamps come from the stream's
//! presentation time when available, otherwise from the nominal frame rate.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::software::scaling;
use std::time::{Duration, Instant};

use super::file::FileConfig;
use super::{health_grace, nominal_timestamp, Frame, SourceStats};

/// Video track of an opened container.
struct VideoTrack {
    index: usize,
    /// Seconds per pts tick.
    time_base: f64,
    decoder: ffmpeg::codec::decoder::Video,
}

fn open_video_track(input: &Input, path: &str) -> Result<VideoTrack> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| anyhow!("file has no video track: {}", path))?;
    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("load video decoder parameters")?
        .decoder()
        .video()
        .context("open ffmpeg video decoder")?;
    Ok(VideoTrack {
        index: stream.index(),
        time_base: f64::from(stream.time_base()),
        decoder,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    Reading,
    Draining,
    Done,
}

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: Input,
    track: VideoTrack,
    to_rgb: scaling::Context,
    state: DecodeState,
    frame_count: u64,
    first_pts: Option<i64>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open video file '{}'", config.path))?;
        let track = open_video_track(&input, &config.path)?;
        let (w, h) = (track.decoder.width(), track.decoder.height());
        let to_rgb = scaling::Context::get(
            track.decoder.format(),
            w,
            h,
            ffmpeg::util::format::pixel::Pixel::RGB24,
            w,
            h,
            scaling::Flags::BILINEAR,
        )
        .context("create RGB24 scaler")?;
        log::debug!("FileSource: {} is {}x{}", config.path, w, h);

        Ok(Self {
            config,
            input,
            track,
            to_rgb,
            state: DecodeState::Reading,
            frame_count: 0,
            first_pts: None,
            connected_at: None,
            last_frame_at: None,
            last_error: None,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!("FileSource: connected to {} (ffmpeg)", self.config.path);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.state {
                DecodeState::Done => return Ok(None),
                _ if self.track.decoder.receive_frame(&mut decoded).is_ok() => {
                    return self.to_frame(&decoded).map(Some);
                }
                DecodeState::Draining => {
                    self.state = DecodeState::Done;
                    log::info!(
                        "FileSource: {} ended after {} frames",
                        self.config.path,
                        self.frame_count
                    );
                }
                DecodeState::Reading => {
                    if !self.feed_packet()? {
                        self.track.decoder.send_eof().context("flush ffmpeg decoder")?;
                        self.state = DecodeState::Draining;
                    }
                }
            }
        }
    }

    /// Send the next packet of the video track. False at end of file.
    fn feed_packet(&mut self) -> Result<bool> {
        let index = self.track.index;
        let Some((_, packet)) = self
            .input
            .packets()
            .find(|(stream, _)| stream.index() == index)
        else {
            return Ok(false);
        };
        if let Err(err) = self.track.decoder.send_packet(&packet) {
            self.last_error = Some(err.to_string());
            return Err(anyhow::Error::new(err).context("send packet to ffmpeg decoder"));
        }
        Ok(true)
    }

    fn to_frame(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.to_rgb
            .run(decoded, &mut rgb)
            .context("scale frame to RGB")?;
        let pixels = packed_rgb(&rgb)?;

        let index = self.frame_count;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let timestamp = match decoded.timestamp() {
            Some(pts) => {
                let first = *self.first_pts.get_or_insert(pts);
                Duration::from_secs_f64((pts - first).max(0) as f64 * self.track.time_base)
            }
            None => nominal_timestamp(index, self.config.target_fps),
        };
        Ok(Frame::new(pixels, rgb.width(), rgb.height(), index, timestamp))
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        if self.state == DecodeState::Done {
            return true;
        }
        match (self.connected_at, self.last_frame_at) {
            (None, _) => false,
            (Some(connected_at), None) => connected_at.elapsed() <= Duration::from_secs(5),
            (Some(_), Some(last)) => last.elapsed() <= health_grace(self.config.target_fps),
        }
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.path.clone(),
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = DecodeState::Done;
    }
}

/// Copy plane 0 of an RGB24 frame into a tightly packed buffer.
fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let row_bytes = frame.width() as usize * 3;
    let rows = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);
    if stride == 0 || stride < row_bytes {
        return Err(anyhow!("ffmpeg stride {} shorter than a row ({})", stride, row_bytes));
    }

    let mut pixels = Vec::with_capacity(row_bytes * rows);
    for row in data.chunks(stride).take(rows) {
        let row = row
            .get(..row_bytes)
            .context("ffmpeg frame row is out of bounds")?;
        pixels.extend_from_slice(row);
    }
    if pixels.len() != row_bytes * rows {
        return Err(anyhow!("ffmpeg frame is shorter than its dimensions"));
    }
    Ok(pixels)
}
