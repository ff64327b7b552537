//! # Local media
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `device`    | Platform capture seam and device error taxonomy      |
//! | `track`     | Shared-state capture track handles                   |
//! | `bundle`    | Ownership of a set of tracks                         |
//! | `profile`   | Quality profiles and `auto` resolution               |
//! | `pipeline`  | Acquisition, mute toggles and camera/screen swapping |
//! | `synthetic` | Virtual device set for self-tests                    |

pub mod bundle;
pub mod device;
pub mod pipeline;
pub mod profile;
pub mod synthetic;
pub mod track;

pub use bundle::MediaBundle;
pub use device::{CaptureRequest, DeviceClass, DeviceError, DeviceInfo, DeviceKinds, MediaDevices};
pub use pipeline::MediaPipeline;
pub use profile::{
    AudioConstraints, ConnectionClass, MediaProfile, NetworkHint, VideoConstraints,
};
pub use synthetic::SyntheticDevices;
pub use track::{MediaKind, MediaTrack, TrackSettings, TrackSource};
