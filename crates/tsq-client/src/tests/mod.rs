//! Tests spanning the client, transport and transfer modules.

mod client;
mod support;
