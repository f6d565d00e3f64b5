// SPDX-License-Identifier: GPL-3.0-only
use crate::protocols::dxva2::Dxva2Monitors;
use crate::protocols::ioctl::IoctlPanel;
use crate::protocols::wmi::WmiBrightness;
use crate::protocols::BackendKind;

/// Backend owned by a handle
pub enum HandleBody {
    /// Physical monitors over the display channel (external monitors)
    Dxva2(Dxva2Monitors),
    /// Instrumentation brightness method (internal panels)
    Wmi(WmiBrightness),
    /// LCD driver control codes (legacy internal panels)
    Ioctl(IoctlPanel),
}

impl std::fmt::Debug for HandleBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleBody::Dxva2(monitors) => write!(f, "{:?}", monitors),
            HandleBody::Wmi(wmi) => write!(f, "{:?}", wmi),
            HandleBody::Ioctl(panel) => write!(f, "{:?}", panel),
        }
    }
}

impl HandleBody {
    /// Kind tag written into the handle header
    pub fn kind(&self) -> BackendKind {
        match self {
            HandleBody::Dxva2(_) => BackendKind::Dxva2,
            HandleBody::Wmi(_) => BackendKind::Wmi,
            HandleBody::Ioctl(_) => BackendKind::Ioctl,
        }
    }

    pub fn as_dxva2(&self) -> Option<&Dxva2Monitors> {
        match self {
            HandleBody::Dxva2(monitors) => Some(monitors),
            _ => None,
        }
    }

    pub fn as_wmi(&self) -> Option<&WmiBrightness> {
        match self {
            HandleBody::Wmi(wmi) => Some(wmi),
            _ => None,
        }
    }

    pub fn as_ioctl(&self) -> Option<&IoctlPanel> {
        match self {
            HandleBody::Ioctl(panel) => Some(panel),
            _ => None,
        }
    }
}

impl From<Dxva2Monitors> for HandleBody {
    fn from(monitors: Dxva2Monitors) -> Self {
        HandleBody::Dxva2(monitors)
    }
}

impl From<WmiBrightness> for HandleBody {
    fn from(wmi: WmiBrightness) -> Self {
        HandleBody::Wmi(wmi)
    }
}

impl From<IoctlPanel> for HandleBody {
    fn from(panel: IoctlPanel) -> Self {
        HandleBody::Ioctl(panel)
    }
}
