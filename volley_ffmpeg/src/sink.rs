use std::path::Path;

use anyhow::{bail, Context as _};
use ffmpeg::codec;
use ffmpeg::format::{self, context, Pixel};
use ffmpeg::software::scaling::{context::Context, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::{Packet, Rational};
use volley_common::sink::FrameSink;
use volley_common::{AnnotatedFrame, VideoInfo};

/// Encodes annotated frames into a new container, H.264 when available.
///
/// The file is only playable after [`FrameSink::finish`]; dropping the sink
/// earlier closes the file without a trailer.
pub struct FfmpegSink {
    octx: context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    finished: bool,
}

impl FfmpegSink {
    pub fn create(path: &Path, info: &VideoInfo) -> anyhow::Result<Self> {
        let (num, den) = info.fps;
        if num <= 0 || den <= 0 {
            bail!("Cannot encode with frame rate {num}/{den}");
        }
        let frame_rate = Rational::new(num, den);
        let encoder_time_base = frame_rate.invert();

        let codec = ffmpeg::encoder::find(codec::Id::H264)
            .or_else(|| {
                log::warn!("No H.264 encoder available, falling back to MPEG-4");
                ffmpeg::encoder::find(codec::Id::MPEG4)
            })
            .context("No usable video encoder found")?;

        let supported: Vec<Pixel> = codec
            .video()
            .ok()
            .and_then(|video| video.formats())
            .map(|formats| formats.collect())
            .unwrap_or_default();
        let Some(pixel_format) = pick_pixel_format(info.width, info.height, &supported) else {
            bail!(
                "{} cannot encode {}x{} frames: odd dimensions need a 4:4:4 capable encoder",
                codec.name(),
                info.width,
                info.height
            );
        };

        let mut octx = format::output(&path)
            .with_context(|| format!("Failed to create output {path:?}"))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut ost = octx.add_stream(codec)?;
        let stream_index = ost.index();

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(info.width);
        encoder.set_height(info.height);
        encoder.set_format(pixel_format);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .with_context(|| format!("Failed to open {:?} encoder", codec.name()))?;
        ost.set_parameters(&encoder);
        ost.set_time_base(encoder_time_base);

        octx.write_header()
            .with_context(|| format!("Failed to write header of {path:?}"))?;
        // the muxer may pick its own time base while writing the header
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = Context::get(
            Pixel::RGB24,
            info.width,
            info.height,
            pixel_format,
            info.width,
            info.height,
            Flags::BILINEAR,
        )?;

        log::info!(
            "Writing {path:?} with {} ({pixel_format:?}) at {}x{} {num}/{den} fps",
            codec.name(),
            info.width,
            info.height
        );
        Ok(Self {
            octx,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width: info.width,
            height: info.height,
            next_pts: 0,
            finished: false,
        })
    }

    fn write_pending_packets(&mut self) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn write(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<()> {
        if self.finished {
            bail!("Output is already finalized");
        }
        if frame.image.dimensions() != (self.width, self.height) {
            bail!(
                "Frame {} is {:?}, output expects {}x{}",
                frame.index,
                frame.image.dimensions(),
                self.width,
                self.height
            );
        }

        let mut rgb = Video::new(Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        unpack_rows(frame.image.as_raw(), rgb.data_mut(0), stride, self.width as usize * 3);

        let mut yuv = Video::empty();
        self.scaler.run(&rgb, &mut yuv)?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder.send_frame(&yuv)?;
        self.write_pending_packets()
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.encoder.send_eof()?;
        self.write_pending_packets()?;
        self.octx.write_trailer()?;
        self.finished = true;
        log::debug!("Output finalized after {} frames", self.next_pts);
        Ok(())
    }
}

/// Chroma layout for the encoder. 4:2:0 halves both chroma planes, so frames
/// with an odd side fall back to 4:4:4 to keep their exact size. An empty
/// `supported` list means the encoder did not advertise its formats.
pub fn pick_pixel_format(width: u32, height: u32, supported: &[Pixel]) -> Option<Pixel> {
    let preferred: &[Pixel] = if width % 2 == 0 && height % 2 == 0 {
        &[Pixel::YUV420P, Pixel::YUV444P]
    } else {
        &[Pixel::YUV444P]
    };
    preferred
        .iter()
        .copied()
        .find(|format| supported.is_empty() || supported.contains(format))
}

/// Spreads tightly packed rows of `row_bytes` into a buffer whose rows are
/// `stride` bytes apart.
pub fn unpack_rows(src: &[u8], dst: &mut [u8], stride: usize, row_bytes: usize) {
    for (src_row, dst_row) in src.chunks_exact(row_bytes).zip(dst.chunks_mut(stride)) {
        dst_row[..row_bytes].copy_from_slice(src_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_rows_into_padded() {
        let src = [1, 2, 3, 4, 5, 6];
        let mut dst = [9u8; 8];
        unpack_rows(&src, &mut dst, 4, 3);
        assert_eq!(dst, [1, 2, 3, 9, 4, 5, 6, 9]);
    }

    #[test]
    fn test_unpack_pack_identity() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 16];
        unpack_rows(&src, &mut dst, 8, 6);
        assert_eq!(crate::source::pack_rows(&dst, 8, 6, 2), src);
    }

    #[test]
    fn test_pick_pixel_format() {
        let h264 = [Pixel::YUV420P, Pixel::YUV422P, Pixel::YUV444P, Pixel::NV12];
        assert_eq!(pick_pixel_format(1920, 1080, &h264), Some(Pixel::YUV420P));
        assert_eq!(pick_pixel_format(641, 480, &h264), Some(Pixel::YUV444P));
        assert_eq!(pick_pixel_format(640, 481, &h264), Some(Pixel::YUV444P));
        assert_eq!(pick_pixel_format(641, 481, &[]), Some(Pixel::YUV444P));

        let mpeg4 = [Pixel::YUV420P];
        assert_eq!(pick_pixel_format(640, 480, &mpeg4), Some(Pixel::YUV420P));
        assert_eq!(pick_pixel_format(641, 480, &mpeg4), None);
    }

    #[test]
    fn test_rejects_bad_frame_rate() {
        let info = VideoInfo {
            width: 64,
            height: 48,
            fps: (0, 1),
            total_frames: 1,
        };
        let out = std::env::temp_dir().join("volley_ffmpeg_bad_rate.mp4");
        assert!(FfmpegSink::create(&out, &info).is_err());
    }
}
