//! Data model shared between the recsched scheduler and its host application.
//!
//! This crate defines the records the scheduler stores and exchanges with the
//! host: reservation and query identities, recording options, and the EPG /
//! present-following views the host supplies.
//!
//! # Identities
//!
//! A service is identified by its `(network_id, transport_stream_id,
//! service_id)` triple and a program by adding the `event_id`:
//!
//! ```rust
//! use recsched_model::{EventKey, ServiceKey};
//!
//! let service = ServiceKey::new(0x7FE8, 0x7FE8, 1024);
//! let key = EventKey::new(service, 0x1234);
//! assert_eq!(key.service, service);
//! assert!(service.is_valid_network());
//! ```
//!
//! # Trimmed windows
//!
//! Reservations carry optional margins; the effective recording window is the
//! "trimmed" window after applying the resolved margins:
//!
//! ```rust
//! use chrono::NaiveDate;
//! use recsched_model::{EventKey, RecordingOption, Reservation, ServiceKey};
//!
//! let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(21, 0, 0).unwrap();
//! let key = EventKey::new(ServiceKey::new(4, 16625, 211), 100);
//! let res = Reservation::new(key, start, 3600, "News");
//!
//! let defaults = RecordingOption { start_margin: Some(30), end_margin: Some(-10), ..Default::default() };
//! assert_eq!(res.trimmed_start(&defaults), start - chrono::Duration::seconds(30));
//! assert_eq!(res.trimmed_duration(&defaults), 3620);
//! ```

pub mod arib_time;
pub mod epg;
pub mod error;
pub mod types;

pub use epg::{
    EpgEvent, EventGroup, Genre, GroupEvent, ProgramInfo, RecorderStatus, StreamStats,
    TunerChannel,
};
pub use error::ModelError;
pub use types::{
    EventKey, FollowMode, GenreFilter, NameOrigin, PostStopAction, Query,
    RecordingOption, Reservation, ResolvedOption, ServiceKey, Weekdays, GENRE_WILDCARD,
};
