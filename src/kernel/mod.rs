//! The delivery engine: feed wire types, classification, dedup, backoff and
//! the connection actor. Nothing here touches the filesystem; persistence is
//! reached only through `store::Watermark`.

pub mod backoff;
pub mod classifier;
pub mod connection;
pub mod event;
pub mod notification;
pub mod seen;
