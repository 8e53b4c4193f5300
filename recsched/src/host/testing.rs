//! Scripted host for scheduler tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use recsched_model::{
    EpgEvent, EventKey, PostStopAction, ProgramInfo, Query, RecorderStatus, Reservation,
    ServiceKey, StreamStats, TunerChannel,
};

use super::{
    EpgProvider, Notifier, NotifyLevel, Persistence, PowerControl, RecorderControl,
    RecordingHooks, SuspendRequest, TunerControl,
};
use crate::error::HostError;
use crate::recording::{RecordingInfo, RecordingState};

pub const MAIN_DRIVER: &str = "BonDriver_PT3-T.dll";
pub const SUB_DRIVER: &str = "BonDriver_PT3-S.dll";

pub fn nhk() -> ServiceKey {
    ServiceKey::new(0x7FE8, 0x7FE8, 1024)
}

pub fn nhk_sub() -> ServiceKey {
    ServiceKey::new(0x7FE8, 0x7FE8, 1025)
}

pub fn etv() -> ServiceKey {
    ServiceKey::new(0x7FE9, 0x7FE9, 1032)
}

pub fn bs() -> ServiceKey {
    ServiceKey::new(0x0004, 16625, 101)
}

pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 4, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn tuner_channel(space: u32, channel: u32, key: ServiceKey, name: &str) -> TunerChannel {
    TunerChannel {
        space,
        channel,
        network_id: key.network_id,
        transport_stream_id: key.transport_stream_id,
        service_id: key.service_id,
        name: name.to_string(),
    }
}

pub fn terrestrial_channels() -> Vec<TunerChannel> {
    vec![
        tuner_channel(0, 0, nhk(), "NHK総合"),
        tuner_channel(0, 0, nhk_sub(), "NHK総合2"),
        tuner_channel(0, 1, etv(), "NHK Eテレ"),
    ]
}

pub fn satellite_channels() -> Vec<TunerChannel> {
    vec![tuner_channel(0, 0, bs(), "NHK BS")]
}

#[derive(Debug)]
pub struct FakeHost {
    pub events: HashMap<EventKey, EpgEvent>,
    pub service_events: HashMap<ServiceKey, Vec<EpgEvent>>,
    pub present: Option<ProgramInfo>,
    pub following: Option<ProgramInfo>,

    pub driver: Option<String>,
    pub channels: Vec<TunerChannel>,
    pub driver_channel_lists: HashMap<String, Vec<TunerChannel>>,
    pub current: Option<TunerChannel>,
    pub tunes: Vec<ServiceKey>,
    pub driver_switches: Vec<String>,

    pub recorder: RecorderStatus,
    pub start_failures: u32,
    pub start_attempts: u32,
    pub started_paths: Vec<PathBuf>,
    pub stop_calls: u32,
    pub stats: Option<StreamStats>,

    pub standby: bool,
    pub standby_calls: Vec<bool>,
    pub preview_calls: Vec<bool>,
    pub closed: bool,
    pub suspend_requests: Vec<SuspendRequest>,
    pub confirm_answer: bool,
    pub confirmations: Vec<PostStopAction>,

    pub notices: Vec<(NotifyLevel, String)>,
    pub states: Vec<RecordingState>,
    pub hook_starts: Vec<RecordingInfo>,
    pub hook_ends: Vec<RecordingInfo>,

    pub stored_reservations: Vec<Reservation>,
    pub stored_queries: Vec<Query>,
    pub reservation_saves: u32,
    pub query_saves: u32,
    pub fail_saves: bool,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// Terrestrial driver loaded, satellite driver available, recorder idle.
    pub fn new() -> Self {
        let mut driver_channel_lists = HashMap::new();
        driver_channel_lists.insert(MAIN_DRIVER.to_string(), terrestrial_channels());
        driver_channel_lists.insert(SUB_DRIVER.to_string(), satellite_channels());
        Self {
            events: HashMap::new(),
            service_events: HashMap::new(),
            present: None,
            following: None,
            driver: Some(MAIN_DRIVER.to_string()),
            channels: terrestrial_channels(),
            driver_channel_lists,
            current: None,
            tunes: Vec::new(),
            driver_switches: Vec::new(),
            recorder: RecorderStatus::Idle,
            start_failures: 0,
            start_attempts: 0,
            started_paths: Vec::new(),
            stop_calls: 0,
            stats: Some(StreamStats::default()),
            standby: false,
            standby_calls: Vec::new(),
            preview_calls: Vec::new(),
            closed: false,
            suspend_requests: Vec::new(),
            confirm_answer: true,
            confirmations: Vec::new(),
            notices: Vec::new(),
            states: Vec::new(),
            hook_starts: Vec::new(),
            hook_ends: Vec::new(),
            stored_reservations: Vec::new(),
            stored_queries: Vec::new(),
            reservation_saves: 0,
            query_saves: 0,
            fail_saves: false,
        }
    }

    pub fn add_event(&mut self, service: ServiceKey, event: EpgEvent) {
        self.events
            .insert(EventKey::new(service, event.event_id), event.clone());
        let list = self.service_events.entry(service).or_default();
        list.push(event);
        list.sort_by_key(|e| e.start);
    }

    pub fn tune_to(&mut self, key: ServiceKey) {
        self.current = self
            .channels
            .iter()
            .find(|ch| ch.service_key() == key)
            .cloned();
    }

    pub fn has_notice(&self, needle: &str) -> bool {
        self.notices.iter().any(|(_, m)| m.contains(needle))
    }
}

impl EpgProvider for FakeHost {
    fn event(&self, key: &EventKey) -> Option<EpgEvent> {
        self.events.get(key).cloned()
    }

    fn events(&self, service: &ServiceKey) -> Option<Vec<EpgEvent>> {
        self.service_events.get(service).cloned()
    }

    fn present(&self) -> Option<ProgramInfo> {
        self.present
    }

    fn following(&self) -> Option<ProgramInfo> {
        self.following
    }
}

impl TunerControl for FakeHost {
    fn driver_name(&self) -> Option<String> {
        self.driver.clone()
    }

    fn channels(&self) -> Vec<TunerChannel> {
        self.channels.clone()
    }

    fn driver_channels(&self, driver: &str) -> Option<Vec<TunerChannel>> {
        self.driver_channel_lists.get(driver).cloned()
    }

    fn current_channel(&self) -> Option<TunerChannel> {
        self.current.clone()
    }

    fn set_driver(&mut self, driver: &str) -> Result<(), HostError> {
        let channels = self
            .driver_channel_lists
            .get(driver)
            .cloned()
            .ok_or_else(|| HostError::DriverUnavailable(driver.to_string()))?;
        self.driver = Some(driver.to_string());
        self.channels = channels;
        self.current = None;
        self.driver_switches.push(driver.to_string());
        Ok(())
    }

    fn set_channel(&mut self, space: u32, channel: u32, service_id: u16) -> Result<(), HostError> {
        let found = self
            .channels
            .iter()
            .find(|ch| ch.space == space && ch.channel == channel && ch.service_id == service_id)
            .cloned()
            .ok_or_else(|| HostError::Tuning(format!("space={} channel={}", space, channel)))?;
        self.tunes.push(found.service_key());
        self.current = Some(found);
        Ok(())
    }
}

impl RecorderControl for FakeHost {
    fn start_recording(&mut self, path: &Path) -> Result<(), HostError> {
        self.start_attempts += 1;
        if self.start_failures > 0 {
            self.start_failures -= 1;
            return Err(HostError::Recorder("file exists".to_string()));
        }
        self.started_paths.push(path.to_path_buf());
        self.recorder = RecorderStatus::Recording;
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), HostError> {
        self.stop_calls += 1;
        self.recorder = RecorderStatus::Idle;
        Ok(())
    }

    fn recorder_status(&self) -> RecorderStatus {
        self.recorder
    }

    fn recording_path(&self) -> Option<PathBuf> {
        self.started_paths.last().cloned()
    }

    fn stream_stats(&self) -> Option<StreamStats> {
        self.stats
    }
}

impl PowerControl for FakeHost {
    fn is_standby(&self) -> bool {
        self.standby
    }

    fn set_standby(&mut self, standby: bool) -> Result<(), HostError> {
        self.standby = standby;
        self.standby_calls.push(standby);
        Ok(())
    }

    fn set_preview(&mut self, enable: bool) -> Result<(), HostError> {
        self.preview_calls.push(enable);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn request_suspend(&mut self, request: SuspendRequest) -> Result<(), HostError> {
        self.suspend_requests.push(request);
        Ok(())
    }

    fn confirm(&mut self, action: PostStopAction) -> bool {
        self.confirmations.push(action);
        self.confirm_answer
    }
}

impl Notifier for FakeHost {
    fn notify(&mut self, level: NotifyLevel, message: &str) {
        self.notices.push((level, message.to_string()));
    }

    fn state_changed(&mut self, state: RecordingState) {
        self.states.push(state);
    }
}

impl RecordingHooks for FakeHost {
    fn on_start(&mut self, info: &RecordingInfo) -> Result<(), HostError> {
        self.hook_starts.push(info.clone());
        Ok(())
    }

    fn on_end(&mut self, info: &RecordingInfo) -> Result<(), HostError> {
        self.hook_ends.push(info.clone());
        Ok(())
    }
}

impl Persistence for FakeHost {
    fn load_reservations(&mut self) -> Result<Vec<Reservation>, HostError> {
        Ok(self.stored_reservations.clone())
    }

    fn save_reservations(&mut self, reservations: &[Reservation]) -> Result<(), HostError> {
        if self.fail_saves {
            return Err(HostError::Persistence("disk full".to_string()));
        }
        self.reservation_saves += 1;
        self.stored_reservations = reservations.to_vec();
        Ok(())
    }

    fn load_queries(&mut self) -> Result<Vec<Query>, HostError> {
        Ok(self.stored_queries.clone())
    }

    fn save_queries(&mut self, queries: &[Query]) -> Result<(), HostError> {
        if self.fail_saves {
            return Err(HostError::Persistence("disk full".to_string()));
        }
        self.query_saves += 1;
        self.stored_queries = queries.to_vec();
        Ok(())
    }
}
