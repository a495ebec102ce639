//! Version `v1` of the `dex.betssongroup.com` resources.
//!
//! Both kinds carry their own phase vocabulary in `status.state`. The strings are part of the
//! stored resources and are kept exactly as older releases of the operator wrote them, so
//! [`ClientPhase`] and [`AlbAuthPhase`] stay separate types.

mod albauth;
mod client;

pub use albauth::*;
pub use client::*;
