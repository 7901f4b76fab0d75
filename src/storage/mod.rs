// src/storage/mod.rs

pub mod db;
pub mod schema;

pub use db::Db;
pub use db::{
    upsert_snapshot,
    get_snapshot,
    get_latest_snapshot,
    purge_expired,
    insert_subscriber,
    delete_subscriber,
    list_subscribers,
    mark_announced,
    is_announced,
    upsert_pending,
    get_pending,
    get_all_pending,
    delete_pending,
};
