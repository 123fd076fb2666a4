use async_trait::async_trait;
use protocol::config::FixedLocationConfig;

use super::{CaptureNotice, LocationError, LocationProvider, Position};

/// Location source for stationary devices whose position is set in config.
pub(crate) struct FixedLocation {
    position: Option<Position>,
    consent: bool,
    notice: CaptureNotice,
}

impl FixedLocation {
    pub(crate) fn new(
        config: Option<FixedLocationConfig>,
        consent: bool,
        notice: CaptureNotice,
    ) -> Self {
        let position = config.map(|config| Position {
            latitude: config.latitude,
            longitude: config.longitude,
            speed: config.speed,
            heading: config.heading,
        });
        Self {
            position,
            consent,
            notice,
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn request_permission(&self) -> bool {
        self.consent
    }

    async fn services_enabled(&self) -> bool {
        self.position.is_some()
    }

    async fn current_position(&self) -> Result<Position, LocationError> {
        let position = self
            .position
            .ok_or_else(|| LocationError::Unavailable("no position configured".to_string()))?;
        self.notice.announce("location shared");
        Ok(position)
    }
}
