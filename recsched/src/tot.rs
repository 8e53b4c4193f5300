//! TOT/TDT extraction from the transport stream.
//!
//! The host calls [`TimeSignalSink::on_packet`] for every 188-byte packet it
//! receives. Only PID 0x0014 sections that start in the packet are looked at;
//! everything else returns immediately. Terrestrial broadcasts carry a TOT
//! about every 6 seconds (at least every 30 seconds per ARIB).

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use log::trace;
use parking_lot::Mutex;
use recsched_model::arib_time;

use crate::clock::{SignalSample, TimeSource, SIGNAL_LATENCY_MS};

/// TS packet length.
pub const TS_PACKET_SIZE: usize = 188;

/// PID carrying TDT and TOT.
pub const TOT_PID: u16 = 0x0014;

pub const TABLE_ID_TDT: u8 = 0x70;
pub const TABLE_ID_TOT: u8 = 0x73;

/// Writer half of the clock sample, safe to move to the stream thread.
#[derive(Clone)]
pub struct TimeSignalSink {
    sample: Arc<Mutex<SignalSample>>,
    source: Arc<dyn TimeSource>,
}

impl TimeSignalSink {
    pub(crate) fn new(sample: Arc<Mutex<SignalSample>>, source: Arc<dyn TimeSource>) -> Self {
        Self { sample, source }
    }

    /// Store a decoded signal time, compensating for receiver latency.
    pub fn sample(&self, signal: NaiveDateTime) {
        let tick = self.source.tick_ms();
        let mut sample = self.sample.lock();
        sample.time = signal - Duration::milliseconds(SIGNAL_LATENCY_MS);
        sample.tick = tick;
        sample.valid = true;
    }

    /// Inspect one TS packet; returns true if it carried a time signal.
    pub fn on_packet(&self, packet: &[u8]) -> bool {
        match parse_time_signal(packet) {
            Some(time) => {
                trace!("TimeSignal: {}", time);
                self.sample(time);
                true
            }
            None => false,
        }
    }
}

/// Decode the TDT/TOT time of a packet, if it starts one.
pub fn parse_time_signal(packet: &[u8]) -> Option<NaiveDateTime> {
    if packet.len() < TS_PACKET_SIZE || packet[0] != 0x47 {
        return None;
    }

    let pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
    if pid != TOT_PID {
        return None;
    }

    let unit_start = packet[1] & 0x40 != 0;
    let adaptation_control = (packet[3] >> 4) & 0x03;
    // 0: reserved, 2: adaptation field only
    if !unit_start || adaptation_control == 0 || adaptation_control == 2 {
        return None;
    }

    let mut payload = 4;
    if adaptation_control == 3 {
        let adaptation_length = packet[4] as usize;
        if adaptation_length > 182 {
            return None;
        }
        payload += 1 + adaptation_length;
    }

    let pointer_field = *packet.get(payload)? as usize;
    let table = payload + 1 + pointer_field;
    // table_id, section_length (2), JST_time (5)
    if table + 8 > TS_PACKET_SIZE {
        return None;
    }

    let table_id = packet[table];
    if table_id != TABLE_ID_TDT && table_id != TABLE_ID_TOT {
        return None;
    }

    arib_time::decode(&packet[table + 3..table + 8]).ok()
}
