use serde::Serialize;

/// Notifications emitted by a managed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// The channel was opened.
    Activated,
    /// Capabilities, parameters and values were reloaded.
    Refreshed,
    /// A cached parameter value changed.
    ParamUpdated {
        #[serde(rename = "ref")]
        reference: u8,
        name: String,
    },
    /// The logical lock state changed.
    LockChanged { locked: bool },
    /// The channel was closed or lost.
    Disconnected,
}

/// Application endpoints provided by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub params: bool,
    pub update: bool,
    pub fs: bool,
    pub relay: bool,
    pub metrics: bool,
    pub auth: bool,
    pub debug: bool,
}

impl Capabilities {
    pub(crate) fn set(&mut self, endpoint: u8, present: bool) {
        let flag = match endpoint {
            naos_frame::PARAMS => &mut self.params,
            naos_frame::UPDATE => &mut self.update,
            naos_frame::FS => &mut self.fs,
            naos_frame::RELAY => &mut self.relay,
            naos_frame::METRICS => &mut self.metrics,
            naos_frame::AUTH => &mut self.auth,
            naos_frame::DEBUG => &mut self.debug,
            _ => return,
        };
        *flag = present;
    }
}
