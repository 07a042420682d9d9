//! The canonical mutable state shared by the realtime and adaptive layers.
//!
//! The store is an explicitly owned object handed to each component as an
//! `Arc<StateStore>`. Writers call the typed update methods; readers take
//! snapshots or subscribe to [`StoreEvent`]s.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::complexity::ComplexityLevel;
use crate::ids::{InteractionId, SessionId};

/// Cap on the recent-interactions list.
pub const MAX_RECENT_INTERACTIONS: usize = 10;
/// Cap on retained notifications.
pub const MAX_NOTIFICATIONS: usize = 20;
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Weather ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Sunny,
    Cloudy,
    Rainy,
    Stormy,
    Snowy,
    Foggy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherState {
    pub condition: WeatherCondition,
    /// 0.0 (calm) to 1.0 (extreme).
    pub intensity: f64,
    pub wind_speed: f64,
    pub temperature: f64,
}

impl Default for WeatherState {
    fn default() -> Self {
        Self {
            condition: WeatherCondition::Sunny,
            intensity: 0.5,
            wind_speed: 0.2,
            temperature: 20.0,
        }
    }
}

/// Partial weather update; absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherPatch {
    pub condition: Option<WeatherCondition>,
    pub intensity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub temperature: Option<f64>,
}

impl WeatherState {
    pub fn apply(&mut self, patch: WeatherPatch) {
        if let Some(condition) = patch.condition {
            self.condition = condition;
        }
        if let Some(intensity) = patch.intensity {
            self.intensity = intensity.clamp(0.0, 1.0);
        }
        if let Some(wind_speed) = patch.wind_speed {
            self.wind_speed = wind_speed;
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = temperature;
        }
    }
}

// ── Realtime data ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: InteractionId,
    #[serde(rename = "type")]
    pub kind: String,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeData {
    pub active_visitors: u32,
    /// Most recent first, at most [`MAX_RECENT_INTERACTIONS`].
    pub recent_interactions: Vec<Interaction>,
    /// Project id to growth in `0.0..=1.0`.
    pub project_growth: BTreeMap<String, f64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl RealtimeData {
    /// Prepend `interaction`, dropping the oldest past the cap.
    pub fn push_interaction(&mut self, interaction: Interaction) {
        self.recent_interactions.insert(0, interaction);
        self.recent_interactions.truncate(MAX_RECENT_INTERACTIONS);
    }

    pub fn apply(&mut self, patch: RealtimePatch) {
        if let Some(visitors) = patch.active_visitors {
            self.active_visitors = visitors;
        }
        if let Some(mut interactions) = patch.recent_interactions {
            interactions.truncate(MAX_RECENT_INTERACTIONS);
            self.recent_interactions = interactions;
        }
        if let Some(growth) = patch.project_growth {
            self.project_growth = growth;
        }
        if let Some(at) = patch.last_update {
            self.last_update = Some(at);
        }
    }
}

/// Partial realtime update; absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RealtimePatch {
    pub active_visitors: Option<u32>,
    pub recent_interactions: Option<Vec<Interaction>>,
    pub project_growth: Option<BTreeMap<String, f64>>,
    pub last_update: Option<DateTime<Utc>>,
}

// ── Notifications ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A non-blocking, user-visible notice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
    /// Stays on screen until dismissed.
    pub persistent: bool,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            persistent: false,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// Change notifications for the rendering and UI layers.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    WeatherChanged(WeatherState),
    RealtimeChanged(RealtimeData),
    ComplexityChanged { level: ComplexityLevel, manual: bool },
    Notification(Notice),
}

struct StoreInner {
    weather: WeatherState,
    realtime: RealtimeData,
    complexity_level: ComplexityLevel,
    manual_override: Option<ComplexityLevel>,
    notifications: VecDeque<Notice>,
}

pub struct StateStore {
    session_id: SessionId,
    inner: RwLock<StoreInner>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    pub fn new(session_id: SessionId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id,
            inner: RwLock::new(StoreInner {
                weather: WeatherState::default(),
                realtime: RealtimeData::default(),
                complexity_level: ComplexityLevel::default(),
                manual_override: None,
                notifications: VecDeque::new(),
            }),
            events,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn weather(&self) -> WeatherState {
        self.inner.read().weather.clone()
    }

    pub fn realtime_data(&self) -> RealtimeData {
        self.inner.read().realtime.clone()
    }

    pub fn complexity_level(&self) -> ComplexityLevel {
        self.inner.read().complexity_level
    }

    pub fn manual_override(&self) -> Option<ComplexityLevel> {
        self.inner.read().manual_override
    }

    pub fn notifications(&self) -> Vec<Notice> {
        self.inner.read().notifications.iter().cloned().collect()
    }

    pub fn update_weather(&self, patch: WeatherPatch) {
        let snapshot = {
            let mut inner = self.inner.write();
            inner.weather.apply(patch);
            inner.weather.clone()
        };
        self.emit(StoreEvent::WeatherChanged(snapshot));
    }

    pub fn update_realtime_data(&self, patch: RealtimePatch) {
        let snapshot = {
            let mut inner = self.inner.write();
            inner.realtime.apply(patch);
            inner.realtime.clone()
        };
        self.emit(StoreEvent::RealtimeChanged(snapshot));
    }

    /// Prepend an interaction and stamp `last_update` with its timestamp.
    pub fn push_interaction(&self, interaction: Interaction) {
        let at = interaction.timestamp;
        self.modify_realtime(at, |data| data.push_interaction(interaction));
    }

    /// Set one project's growth, leaving the others untouched.
    pub fn set_project_growth(&self, project_id: impl Into<String>, growth: f64, at: DateTime<Utc>) {
        let project_id = project_id.into();
        self.modify_realtime(at, |data| {
            let _ = data.project_growth.insert(project_id, growth);
        });
    }

    pub fn set_active_visitors(&self, count: u32, at: DateTime<Utc>) {
        self.modify_realtime(at, |data| data.active_visitors = count);
    }

    /// Shift the visitor count by `delta`, saturating at `0` and `u32::MAX`.
    pub fn adjust_active_visitors(&self, delta: i64, at: DateTime<Utc>) {
        self.modify_realtime(at, |data| {
            let next = (i64::from(data.active_visitors) + delta).max(0);
            data.active_visitors = u32::try_from(next).unwrap_or(u32::MAX);
        });
    }

    pub fn touch_realtime(&self, at: DateTime<Utc>) {
        self.modify_realtime(at, |_| {});
    }

    /// Read-modify-write of the realtime data under one write lock.
    fn modify_realtime(&self, at: DateTime<Utc>, f: impl FnOnce(&mut RealtimeData)) {
        let snapshot = {
            let mut inner = self.inner.write();
            f(&mut inner.realtime);
            inner.realtime.last_update = Some(at);
            inner.realtime.clone()
        };
        self.emit(StoreEvent::RealtimeChanged(snapshot));
    }

    /// Automatic write that yields to a manual override.
    ///
    /// `None` when pinned, otherwise whether the level changed. The override
    /// check and the write happen under one lock.
    pub fn adjust_complexity_level(&self, level: ComplexityLevel) -> Option<bool> {
        let changed = {
            let mut inner = self.inner.write();
            if inner.manual_override.is_some() {
                return None;
            }
            let changed = inner.complexity_level != level;
            inner.complexity_level = level;
            changed
        };
        if changed {
            self.emit(StoreEvent::ComplexityChanged {
                level,
                manual: false,
            });
        }
        Some(changed)
    }

    /// User-selected level. Pins the level until the next override or
    /// [`Self::clear_manual_override`].
    pub fn set_manual_complexity(&self, level: ComplexityLevel) {
        {
            let mut inner = self.inner.write();
            inner.manual_override = Some(level);
            inner.complexity_level = level;
        }
        self.emit(StoreEvent::ComplexityChanged {
            level,
            manual: true,
        });
    }

    pub fn clear_manual_override(&self) {
        self.inner.write().manual_override = None;
    }

    pub fn show_notification(&self, notice: Notice) {
        {
            let mut inner = self.inner.write();
            if inner.notifications.len() == MAX_NOTIFICATIONS {
                let _ = inner.notifications.pop_front();
            }
            inner.notifications.push_back(notice.clone());
        }
        self.emit(StoreEvent::Notification(notice));
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
