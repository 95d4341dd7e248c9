use super::VideoReader;
use crate::error::{PipelineError, PipelineResult};
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::Video as VideoFrame;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Video reader backed by FFmpeg via ffmpeg-next, software decoding only.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Created on the first frame, once the decoded pixel format is known.
    scaler: Option<scaling::Context>,
    path: PathBuf,
    source_fps: f64,
    estimated_frames: usize,
    packet: ffmpeg_next::codec::packet::Packet,
    /// Whether EOF has been sent to the decoder.
    eof_sent: bool,
}

impl FfmpegReader {
    pub fn new(path: &Path, fps_override: Option<f64>) -> PipelineResult<Self> {
        ffmpeg_next::init().map_err(|e| PipelineError::source_unreadable(path, e))?;

        let input_ctx =
            ffmpeg_next::format::input(&path).map_err(|e| PipelineError::source_unreadable(path, e))?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| PipelineError::source_unreadable(path, "no video stream"))?;
        let video_stream_index = video_stream.index();

        let rational_fps = video_stream.avg_frame_rate();
        let metadata_fps = if rational_fps.denominator() > 0 {
            rational_fps.numerator() as f64 / rational_fps.denominator() as f64
        } else {
            0.0
        };
        let source_fps = fps_override.unwrap_or(metadata_fps);

        let stream_frames = video_stream.frames().max(0) as usize;
        let duration_secs = input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64;
        let estimated_frames = if stream_frames == 0 {
            (duration_secs * source_fps).round().max(0.0) as usize
        } else {
            stream_frames
        };

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .map_err(|e| PipelineError::source_unreadable(path, e))?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| PipelineError::source_unreadable(path, e))?;

        tracing::info!(
            "FfmpegReader: opened {}, duration={:.2}s, fps={:.2}, estimated_frames={}, size={}x{}",
            path.display(),
            duration_secs,
            source_fps,
            estimated_frames,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            path: path.to_path_buf(),
            source_fps,
            estimated_frames,
            packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
        })
    }

    fn decode_error(&self, e: impl ToString) -> PipelineError {
        PipelineError::source_unreadable(&self.path, e)
    }

    /// Pulls the next decoded frame, feeding packets as needed.
    /// Returns `Ok(false)` at end of stream.
    fn decode_next(&mut self, target: &mut VideoFrame) -> PipelineResult<bool> {
        loop {
            match self.decoder.receive_frame(target) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Ok(false);
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(e) => return Err(self.decode_error(e)),
            }

            let mut found_packet = false;
            while self.packet.read(&mut self.input_ctx).is_ok() {
                if self.packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.packet)
                        .map_err(|e| PipelineError::source_unreadable(&self.path, e))?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                // Input exhausted: flush the decoder and drain what it still holds
                self.decoder
                    .send_eof()
                    .map_err(|e| PipelineError::source_unreadable(&self.path, e))?;
                self.eof_sent = true;
            }
        }
    }

    fn to_rgb(&mut self, frame: &VideoFrame) -> PipelineResult<VideoFrame> {
        if self.scaler.is_none() {
            let scaler = scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                Pixel::RGB24,
                frame.width(),
                frame.height(),
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| self.decode_error(e))?;
            self.scaler = Some(scaler);
        }

        let mut rgb = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(frame, &mut rgb)
                .map_err(|e| PipelineError::source_unreadable(&self.path, e))?;
        }
        Ok(rgb)
    }
}

/// Copy an RGB24 ffmpeg frame into an owned image, dropping row padding.
fn rgb_frame_to_image(frame: &VideoFrame) -> Option<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let data = frame.data(0);
    let stride = frame.stride(0);

    let mut buffer = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let offset = y * stride;
        buffer.extend_from_slice(&data[offset..offset + width * 3]);
    }

    RgbImage::from_vec(width as u32, height as u32, buffer)
}

impl VideoReader for FfmpegReader {
    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn frame_count_hint(&self) -> Option<usize> {
        (self.estimated_frames > 0).then_some(self.estimated_frames)
    }

    fn next_frame(&mut self) -> PipelineResult<Option<RgbImage>> {
        let mut decoded = VideoFrame::empty();
        if !self.decode_next(&mut decoded)? {
            return Ok(None);
        }
        let rgb = self.to_rgb(&decoded)?;
        rgb_frame_to_image(&rgb)
            .map(Some)
            .ok_or_else(|| self.decode_error("converted frame has an unexpected buffer size"))
    }
}
