//! Repository layer: query functions organized by table.

pub mod joined_hosts;
pub mod notary_keys;
