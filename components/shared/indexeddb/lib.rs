/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Types shared between the IndexedDB engine and its storage backends:
//! structured values, keys, key ranges, key paths and the error taxonomy.

pub mod encoding;
pub mod error;
pub mod key;
pub mod key_path;
pub mod key_range;
pub mod schema;
pub mod value;

pub use crate::error::{BackendError, BackendResult, Error, Fallible};
pub use crate::key::{
    ConversionResult, IndexedDBKeyType, cmp, compare_two_keys, key_type_to_value,
    value_to_key, value_to_multi_entry_key,
};
pub use crate::key_path::{
    ExtractionResult, KeyPath, check_key_can_be_injected_into_value,
    evaluate_key_path_on_value, extract_key_from_value_using_key_path,
    inject_key_into_value_using_key_path,
};
pub use crate::key_range::{IndexedDBKeyRange, KeyRangeInput, value_to_key_range};
pub use crate::schema::{
    CreateObjectResult, IDBCursorDirection, IndexedDBIndex, IndexedDBObjectStore,
    IndexedDBTxnMode, PutItemResult, TransactionDurability,
};
pub use crate::value::{BlobInfo, StructuredValue};
