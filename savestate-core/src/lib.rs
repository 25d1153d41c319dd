/*!
# savestate core

Save-game state for a narrative game: named flags, the current activity
snapshot, and sprite aliases, persisted to an on-device store and optionally
mirrored to a cloud store.

- [`RecordStore`] owns the in-memory [`Record`] and every edit to it
- [`RecordCodec`] turns a record into a versioned, compressed, integrity
  checked blob and back
- [`LocalBackend`] and [`CloudBackend`] persist a blob together with its save
  timestamp on any [`KeyValueStore`](storage::KeyValueStore)
- [`SaveGame`] ties them together: local-first saves, cloud mirroring, and
  "newest timestamp wins, ties keep local" loading

## Architecture

Storage and compression are adapters behind small traits, so the same save
logic runs against a directory, an in-memory map, or an S3 bucket (feature
`s3`).

## Usage

```rust
use savestate_core::{MemoryStore, SaveGame, SyncSource};

let device = MemoryStore::new();
let cloud = MemoryStore::new();

let mut game = SaveGame::new(device.clone(), cloud.clone());
game.set_cloud_enabled(true);
game.records_mut().set_flag_int("gold", 100);
game.records_mut().increment_flag("gold", 5);
game.save_cloud()?;

let mut next_session = SaveGame::new(device, cloud);
next_session.set_cloud_enabled(true);
assert_eq!(next_session.load_newest()?, SyncSource::Local);
assert_eq!(next_session.records().get_flag_as_int("gold"), 105);
# Ok::<(), savestate_core::SaveError>(())
```
*/

pub mod backend;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod import;
pub mod metadata;
pub mod observability;
pub mod record;
pub mod record_store;
pub mod storage;
pub mod sync;


pub use backend::{CloudBackend, LocalBackend, SavedSnapshot, BLOB_KEY, TIMESTAMP_KEY};
pub use codec::RecordCodec;
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{open_save_game, CloudConfig, CloudTarget, SaveConfig};
pub use error::{Result, SaveError};
pub use import::{load_flag_file, parse_alias_file, parse_flag_file};
pub use metadata::BlobMetadata;
pub use record::{ActivityPayload, ActivityState, FlagValue, PayloadValue, Record};
pub use record_store::RecordStore;
pub use storage::{DirectoryStore, DynStore, KeyValueStore, MemoryStore};
pub use sync::{SaveGame, SyncSource};

#[cfg(feature = "s3")]
pub use storage::S3Store;
