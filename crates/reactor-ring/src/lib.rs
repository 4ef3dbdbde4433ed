mod ring;

pub use ring::{generate_virtual_keys, hash_endpoint_key, Ring, VirtualKey};
