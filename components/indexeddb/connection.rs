/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The set of connections that are currently open in this process.

use std::sync::LazyLock;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use uuid::Uuid;

static OPEN_CONNECTIONS: LazyLock<Mutex<FxHashSet<Uuid>>> =
    LazyLock::new(|| Mutex::new(FxHashSet::default()));

pub fn register(connection: Uuid) {
    OPEN_CONNECTIONS.lock().insert(connection);
}

/// Returns whether the connection was registered.
pub fn unregister(connection: Uuid) -> bool {
    OPEN_CONNECTIONS.lock().remove(&connection)
}

pub fn is_open(connection: Uuid) -> bool {
    OPEN_CONNECTIONS.lock().contains(&connection)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    #[test]
    fn test_register_and_unregister() {
        let connection = Uuid::new_v4();
        assert!(!super::is_open(connection));
        super::register(connection);
        assert!(super::is_open(connection));
        assert!(super::unregister(connection));
        assert!(!super::is_open(connection));
        assert!(!super::unregister(connection));
    }
}
