use std::path::{Path, PathBuf};

use anyhow::anyhow;
use ffmpeg::format::{context, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::Packet;
use image::RgbImage;
use volley_common::source::FrameSource;
use volley_common::{Frame, FrameIndex, PipelineError, VideoInfo};

/// Decodes the best video stream of a container into RGB frames.
///
/// The first frame is decoded while opening, so a container without a single
/// decodable frame is rejected before any output is created.
pub struct FfmpegSource {
    path: PathBuf,
    ictx: context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Context,
    stream_index: usize,
    info: VideoInfo,
    next_index: FrameIndex,
    eof_sent: bool,
    pending: Option<Frame>,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let unavailable = |reason: String| PipelineError::SourceUnavailable {
            input: path.display().to_string(),
            reason,
        };

        let ictx = ffmpeg::format::input(&path).map_err(|e| unavailable(e.to_string()))?;
        let stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| unavailable("no video stream".to_string()))?;
        let stream_index = stream.index();

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| unavailable(e.to_string()))?;
        let decoder = context_decoder
            .decoder()
            .video()
            .map_err(|e| unavailable(e.to_string()))?;

        let mut rate = stream.avg_frame_rate();
        if rate.numerator() <= 0 || rate.denominator() <= 0 {
            rate = stream.rate();
        }
        let fps = (rate.numerator(), rate.denominator());
        let duration_secs = stream.duration().max(0) as f64 * f64::from(stream.time_base());
        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames: estimate_total_frames(stream.frames(), duration_secs, fps),
        };
        if info.width == 0 || info.height == 0 {
            return Err(unavailable("video stream has no dimensions".to_string()));
        }

        let scaler = Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .map_err(|e| unavailable(e.to_string()))?;

        let mut source = Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            scaler,
            stream_index,
            info,
            next_index: 0,
            eof_sent: false,
            pending: None,
        };
        match source.decode_next()? {
            Some(first) => source.pending = Some(first),
            None => return Err(unavailable("stream contains no frames".to_string())),
        }

        log::info!("Opened {path:?}: {info:?}");
        Ok(source)
    }

    fn read_error(&self, err: impl Into<anyhow::Error>) -> PipelineError {
        PipelineError::SourceRead {
            after: self.next_index.checked_sub(1),
            source: err.into(),
        }
    }

    fn to_frame(&mut self, decoded: &Video) -> Result<Frame, PipelineError> {
        let mut rgb = Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| self.read_error(e))?;
        let (width, height) = (rgb.width(), rgb.height());
        let packed = pack_rows(rgb.data(0), rgb.stride(0), width as usize * 3, height as usize);
        let image = RgbImage::from_raw(width, height, packed)
            .ok_or_else(|| self.read_error(anyhow!("decoded frame is smaller than {width}x{height}")))?;
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(frame)
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        match self.pending.take() {
            Some(frame) => Ok(Some(frame)),
            None => self.decode_next(),
        }
    }
}

impl FfmpegSource {
    fn decode_next(&mut self) -> Result<Option<Frame>, PipelineError> {
        let mut decoded = Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.to_frame(&decoded).map(Some),
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(e) => return Err(self.read_error(e)),
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) if packet.stream() == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| self.read_error(e))?;
                }
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().map_err(|e| self.read_error(e))?;
                    self.eof_sent = true;
                }
                Err(e) => return Err(self.read_error(e)),
            }
        }
    }
}

/// Copies `height` rows of `row_bytes` out of a buffer whose rows are
/// `stride` bytes apart.
pub fn pack_rows(data: &[u8], stride: usize, row_bytes: usize, height: usize) -> Vec<u8> {
    if stride == row_bytes {
        return data[..(row_bytes * height).min(data.len())].to_vec();
    }
    data.chunks(stride)
        .take(height)
        .flat_map(|row| &row[..row_bytes.min(row.len())])
        .copied()
        .collect()
}

/// Frame count from the container, or duration times rate when the
/// container does not store one.
pub fn estimate_total_frames(stored: i64, duration_secs: f64, fps: (i32, i32)) -> u64 {
    if stored > 0 {
        return stored as u64;
    }
    if fps.1 == 0 {
        return 0;
    }
    let estimate = duration_secs * fps.0 as f64 / fps.1 as f64;
    if estimate.is_finite() && estimate > 0.0 {
        estimate.round() as u64
    } else {
        0
    }
}
