//! Timestamp and pixel-buffer helpers shared by the FFmpeg host.

use std::time::Duration;

use ffmpeg_next::{Rational, frame::Video as VideoFrame};

/// Copy plane 0 of a packed frame into a tightly packed buffer.
pub(super) fn frame_to_buffer(frame: &VideoFrame, width: u32, height: u32, bytes_per_pixel: usize) -> Vec<u8> {
    let stride = frame.stride(0);
    let row = width as usize * bytes_per_pixel;
    let data = frame.data(0);

    if stride == row {
        data[..row * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            buffer.extend_from_slice(&data[start..start + row]);
        }
        buffer
    }
}

/// Copy a tightly packed buffer into plane 0 of a frame, honoring its stride.
pub(super) fn buffer_to_frame(buffer: &[u8], frame: &mut VideoFrame, width: u32, height: u32, bytes_per_pixel: usize) {
    let stride = frame.stride(0);
    let row = width as usize * bytes_per_pixel;
    let data = frame.data_mut(0);
    for y in 0..height as usize {
        data[y * stride..y * stride + row].copy_from_slice(&buffer[y * row..(y + 1) * row]);
    }
}

/// Seconds represented by `pts` in `time_base`.
pub(super) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Playback position of `pts`, relative to a stream origin in seconds.
pub(super) fn pts_to_duration(pts: i64, time_base: Rational, origin: f64) -> Duration {
    Duration::from_secs_f64((pts_to_seconds(pts, time_base) - origin).max(0.0))
}

/// Container seek target in `AV_TIME_BASE` units for a playback position.
pub(super) fn seek_timestamp(position: Duration, origin: f64) -> i64 {
    ((position.as_secs_f64() + origin) * 1_000_000.0) as i64
}
