//! LD2450 presence radar over a serial port
//!
//! Protocol (report mode, sensor pushes ~10 frames/s):
//! - Baud: 256000, 8N1
//! - Frame: 30 bytes = header `AA FF 03 00`, 3 x 8-byte target records, tail `55 CC`
//! - Record: x, y, speed, resolution as little-endian u16
//! - x, y, speed are sign-magnitude: bit 15 set = positive, low 15 bits = magnitude
//! - An all-zero record is an empty slot

use crate::domain::types::{RadarTarget, ReadOutcome, MAX_TARGETS};
use crate::infra::config::Config;
use crate::io::sensor::SensorLink;
use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

const FRAME_HEADER: [u8; 4] = [0xAA, 0xFF, 0x03, 0x00];
const FRAME_TAIL: [u8; 2] = [0x55, 0xCC];
const TARGET_RECORD_LEN: usize = 8;
const FRAME_LEN: usize = FRAME_HEADER.len() + MAX_TARGETS * TARGET_RECORD_LEN + FRAME_TAIL.len();

/// Cap on buffered bytes; anything older than a few frames is stale anyway
const MAX_BUFFERED: usize = FRAME_LEN * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame is {0} bytes, expected {expected}", expected = FRAME_LEN)]
    Length(usize),
    #[error("frame does not start with the report header")]
    Header,
    #[error("frame tail is {0:02X?}, expected 55 CC")]
    Tail([u8; 2]),
}

/// Decode a sign-magnitude coordinate
#[inline]
fn decode_signed(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

fn decode_record(slot: usize, record: &[u8]) -> RadarTarget {
    let word = |i: usize| u16::from_le_bytes([record[i], record[i + 1]]);
    let (raw_x, raw_y, raw_speed, resolution) = (word(0), word(2), word(4), word(6));

    if raw_x == 0 && raw_y == 0 && raw_speed == 0 && resolution == 0 {
        return RadarTarget::empty(slot);
    }

    let x = decode_signed(raw_x);
    let y = decode_signed(raw_y);
    let distance = f64::from(x).hypot(f64::from(y)).round() as u16;

    RadarTarget { slot, x, y, speed: decode_signed(raw_speed), resolution, distance, valid: true }
}

/// Decode one complete report frame. Slots at or beyond `target_count` are reported empty.
pub fn decode_frame(
    frame: &[u8],
    target_count: usize,
) -> Result<[RadarTarget; MAX_TARGETS], FrameError> {
    if frame.len() != FRAME_LEN {
        return Err(FrameError::Length(frame.len()));
    }
    if frame[..FRAME_HEADER.len()] != FRAME_HEADER {
        return Err(FrameError::Header);
    }
    let tail = [frame[FRAME_LEN - 2], frame[FRAME_LEN - 1]];
    if tail != FRAME_TAIL {
        return Err(FrameError::Tail(tail));
    }

    let records = &frame[FRAME_HEADER.len()..FRAME_LEN - FRAME_TAIL.len()];
    Ok(std::array::from_fn(|slot| {
        if slot >= target_count {
            return RadarTarget::empty(slot);
        }
        let start = slot * TARGET_RECORD_LEN;
        decode_record(slot, &records[start..start + TARGET_RECORD_LEN])
    }))
}

pub struct Ld2450Link {
    device: String,
    baud: u32,
    read_timeout: Duration,
    target_count: usize,
    port: Option<tokio_serial::SerialStream>,
    /// Persistent read buffer; frames can arrive split across reads
    read_buffer: Vec<u8>,
    targets: [RadarTarget; MAX_TARGETS],
}

impl Ld2450Link {
    pub fn new(config: &Config) -> Self {
        Self {
            device: config.sensor_device().to_string(),
            baud: config.sensor_baud(),
            read_timeout: Duration::from_millis(config.read_timeout_ms()),
            target_count: config.target_count(),
            port: None,
            read_buffer: Vec::with_capacity(MAX_BUFFERED),
            targets: std::array::from_fn(RadarTarget::empty),
        }
    }

    /// Discard bytes before the next frame header.
    /// Keeps a possible partial header at the end of the buffer.
    fn synchronize_buffer(&mut self) {
        if self.read_buffer.starts_with(&FRAME_HEADER) {
            return;
        }

        match self.read_buffer.windows(FRAME_HEADER.len()).position(|w| w == FRAME_HEADER) {
            Some(start) => {
                trace!(discarded = start, "ld2450_sync_discarded_bytes");
                self.read_buffer.drain(..start);
            }
            None => {
                let keep = FRAME_HEADER.len() - 1;
                if self.read_buffer.len() > keep {
                    let discard = self.read_buffer.len() - keep;
                    trace!(discarded = discard, "ld2450_sync_no_header");
                    self.read_buffer.drain(..discard);
                }
            }
        }
    }

    /// Consume every complete frame in the buffer and return the newest valid one
    fn take_latest_frame(&mut self) -> Option<[RadarTarget; MAX_TARGETS]> {
        let mut latest = None;

        loop {
            self.synchronize_buffer();
            if self.read_buffer.len() < FRAME_LEN {
                break;
            }

            match decode_frame(&self.read_buffer[..FRAME_LEN], self.target_count) {
                Ok(targets) => {
                    self.read_buffer.drain(..FRAME_LEN);
                    latest = Some(targets);
                }
                Err(e) => {
                    debug!(
                        error = %e,
                        raw_bytes = %hex::encode_upper(&self.read_buffer[..FRAME_LEN]),
                        "ld2450_invalid_frame"
                    );
                    // Skip this header and resynchronise on the next one
                    self.read_buffer.drain(..1);
                }
            }
        }

        latest
    }

    fn store_frame(&mut self, targets: [RadarTarget; MAX_TARGETS]) -> ReadOutcome {
        self.targets = targets;
        ReadOutcome::Frame(targets.iter().filter(|t| t.valid).count())
    }

    /// Drop a broken port; the resilience supervisor reopens it
    fn close_port(&mut self) {
        self.port = None;
        self.read_buffer.clear();
    }
}

#[async_trait]
impl SensorLink for Ld2450Link {
    async fn begin(&mut self) -> anyhow::Result<()> {
        self.read_buffer.clear();
        let port = tokio_serial::new(&self.device, self.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("Failed to open sensor port {}", self.device))?;

        info!(device = %self.device, baud = %self.baud, targets = %self.target_count, "ld2450_port_opened");
        self.port = Some(port);
        Ok(())
    }

    async fn end(&mut self) {
        if self.port.is_some() {
            info!(device = %self.device, "ld2450_port_closed");
        }
        self.close_port();
    }

    fn set_number_of_targets(&mut self, count: usize) {
        self.target_count = count.clamp(1, MAX_TARGETS);
    }

    async fn read(&mut self) -> ReadOutcome {
        if let Some(targets) = self.take_latest_frame() {
            return self.store_frame(targets);
        }

        let deadline = Instant::now() + self.read_timeout;
        let mut temp_buf = [0u8; 128];

        // The port is polled at least once even when the deadline has passed
        let mut polled = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && polled {
                return ReadOutcome::NoData;
            }
            polled = true;
            let Some(port) = self.port.as_mut() else {
                return ReadOutcome::NoData;
            };

            match tokio::time::timeout(remaining, port.read(&mut temp_buf)).await {
                Ok(Ok(0)) => {
                    warn!(device = %self.device, "ld2450_port_eof");
                    self.close_port();
                    return ReadOutcome::NoData;
                }
                Ok(Ok(n)) => {
                    self.read_buffer.extend_from_slice(&temp_buf[..n]);
                    if self.read_buffer.len() > MAX_BUFFERED {
                        let excess = self.read_buffer.len() - MAX_BUFFERED;
                        self.read_buffer.drain(..excess);
                    }
                    if let Some(targets) = self.take_latest_frame() {
                        return self.store_frame(targets);
                    }
                }
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => {}
                Ok(Err(e)) => {
                    warn!(device = %self.device, error = %e, "ld2450_read_error");
                    self.close_port();
                    return ReadOutcome::NoData;
                }
                Err(_) => return ReadOutcome::NoData,
            }
        }
    }

    fn target(&self, slot: usize) -> RadarTarget {
        self.targets.get(slot).copied().unwrap_or_else(|| RadarTarget::empty(slot))
    }

    fn supported_target_count(&self) -> usize {
        self.target_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_signed(value: i16) -> u16 {
        if value >= 0 {
            0x8000 | value as u16
        } else {
            value.unsigned_abs()
        }
    }

    fn record(x: i16, y: i16, speed: i16, resolution: u16) -> [u8; TARGET_RECORD_LEN] {
        let mut out = [0u8; TARGET_RECORD_LEN];
        out[0..2].copy_from_slice(&encode_signed(x).to_le_bytes());
        out[2..4].copy_from_slice(&encode_signed(y).to_le_bytes());
        out[4..6].copy_from_slice(&encode_signed(speed).to_le_bytes());
        out[6..8].copy_from_slice(&resolution.to_le_bytes());
        out
    }

    fn frame(records: [[u8; TARGET_RECORD_LEN]; MAX_TARGETS]) -> Vec<u8> {
        let mut out = FRAME_HEADER.to_vec();
        for r in records {
            out.extend_from_slice(&r);
        }
        out.extend_from_slice(&FRAME_TAIL);
        out
    }

    fn empty_record() -> [u8; TARGET_RECORD_LEN] {
        [0u8; TARGET_RECORD_LEN]
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(FRAME_LEN, 30);
    }

    #[test]
    fn test_decode_signed_magnitude() {
        assert_eq!(decode_signed(0x8000 | 2000), 2000);
        assert_eq!(decode_signed(2000), -2000);
        assert_eq!(decode_signed(0), 0);
    }

    #[test]
    fn test_decode_frame_targets() {
        let bytes = frame([record(-782, 1713, -16, 360), empty_record(), record(100, 0, 0, 320)]);
        let targets = decode_frame(&bytes, 3).unwrap();

        assert!(targets[0].valid);
        assert_eq!(targets[0].x, -782);
        assert_eq!(targets[0].y, 1713);
        assert_eq!(targets[0].speed, -16);
        assert_eq!(targets[0].resolution, 360);
        assert_eq!(targets[0].distance, 1883);

        assert!(!targets[1].valid);
        assert_eq!(targets[1].slot, 1);

        assert!(targets[2].valid);
        assert_eq!(targets[2].distance, 100);
    }

    #[test]
    fn test_decode_frame_masks_slots_beyond_target_count() {
        let bytes = frame([record(1, 1, 0, 1), record(2, 2, 0, 1), record(3, 3, 0, 1)]);
        let targets = decode_frame(&bytes, 1).unwrap();
        assert!(targets[0].valid);
        assert!(!targets[1].valid);
        assert!(!targets[2].valid);
    }

    #[test]
    fn test_decode_frame_rejects_bad_tail() {
        let mut bytes = frame([empty_record(), empty_record(), empty_record()]);
        bytes[29] = 0x00;
        assert_eq!(decode_frame(&bytes, 3), Err(FrameError::Tail([0x55, 0x00])));
    }

    #[test]
    fn test_decode_frame_rejects_bad_length_and_header() {
        assert_eq!(decode_frame(&[0xAA; 10], 3), Err(FrameError::Length(10)));
        let mut bytes = frame([empty_record(), empty_record(), empty_record()]);
        bytes[0] = 0x00;
        assert_eq!(decode_frame(&bytes, 3), Err(FrameError::Header));
    }

    #[test]
    fn test_take_latest_frame_resyncs_after_garbage() {
        let mut link = Ld2450Link::new(&Config::default());
        link.read_buffer.extend_from_slice(&[0x01, 0x02, 0xAA, 0x13]);
        link.read_buffer.extend(frame([record(-2000, 2000, 0, 360), empty_record(), empty_record()]));

        let targets = link.take_latest_frame().unwrap();
        assert_eq!(targets[0].x, -2000);
        assert!(link.read_buffer.is_empty());
    }

    #[test]
    fn test_take_latest_frame_keeps_newest_and_partial_tail() {
        let mut link = Ld2450Link::new(&Config::default());
        link.read_buffer.extend(frame([record(10, 10, 0, 1), empty_record(), empty_record()]));
        link.read_buffer.extend(frame([record(20, 20, 0, 1), empty_record(), empty_record()]));
        let partial = frame([record(30, 30, 0, 1), empty_record(), empty_record()]);
        link.read_buffer.extend_from_slice(&partial[..12]);

        let targets = link.take_latest_frame().unwrap();
        assert_eq!(targets[0].x, 20);
        assert_eq!(link.read_buffer.len(), 12);

        link.read_buffer.extend_from_slice(&partial[12..]);
        assert_eq!(link.take_latest_frame().unwrap()[0].x, 30);
    }

    #[test]
    fn test_take_latest_frame_skips_corrupt_frame() {
        let mut link = Ld2450Link::new(&Config::default());
        let mut corrupt = frame([record(10, 10, 0, 1), empty_record(), empty_record()]);
        corrupt[29] = 0xFF;
        link.read_buffer.extend(corrupt);
        link.read_buffer.extend(frame([record(40, 40, 0, 1), empty_record(), empty_record()]));

        assert_eq!(link.take_latest_frame().unwrap()[0].x, 40);
    }

    #[test]
    fn test_partial_header_is_kept() {
        let mut link = Ld2450Link::new(&Config::default());
        link.read_buffer.extend_from_slice(&[0x10, 0x11, 0x12, 0x13, 0xAA, 0xFF, 0x03]);
        assert!(link.take_latest_frame().is_none());
        assert_eq!(link.read_buffer, vec![0xAA, 0xFF, 0x03]);
    }

    #[tokio::test]
    async fn test_read_without_port_is_no_data() {
        let mut link = Ld2450Link::new(&Config::default());
        assert_eq!(link.read().await, ReadOutcome::NoData);
    }

    #[test]
    fn test_store_frame_counts_valid_targets() {
        let mut link = Ld2450Link::new(&Config::default());
        let targets = decode_frame(
            &frame([record(1, 1, 0, 1), empty_record(), record(2, 2, 0, 1)]),
            3,
        )
        .unwrap();
        assert_eq!(link.store_frame(targets), ReadOutcome::Frame(2));
        assert!(link.target(2).valid);
        assert!(!link.target(7).valid);
        assert_eq!(link.target(7).slot, 7);
    }

    #[test]
    fn test_set_number_of_targets_clamps() {
        let mut link = Ld2450Link::new(&Config::default());
        link.set_number_of_targets(0);
        assert_eq!(link.supported_target_count(), 1);
        link.set_number_of_targets(10);
        assert_eq!(link.supported_target_count(), 3);
    }
}
