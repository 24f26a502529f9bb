// Local Store: sled-backed persistence for the in-progress flow and the
// cached bucket list
//
// Storage format:
//   Tree: "flow"     Key: "flow:{deposit_id}" and "flow:current"   Value: FlowState JSON
//   Tree: "buckets"  Key: "buckets:list"                           Value: BucketSnapshot JSON

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use std::path::Path;

use crate::buckets::BucketSnapshot;
use crate::flow::FlowState;

const FLOW_TREE: &str = "flow";
const BUCKETS_TREE: &str = "buckets";
const CURRENT_FLOW_KEY: &str = "flow:current";
const BUCKETS_KEY: &str = "buckets:list";

pub struct LocalStore {
    db: Db,
}

impl LocalStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open (or create) the database under `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let db = sled::open(dir).with_context(|| format!("opening store at {}", dir.display()))?;
        Ok(Self::new(db))
    }

    fn flow_key(deposit_id: &str) -> String {
        format!("flow:{}", deposit_id)
    }

    fn read<T: DeserializeOwned>(&self, tree: &str, key: &str) -> Result<Option<T>> {
        let tree = self.db.open_tree(tree)?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decoding stored value {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, tree: &str, key: &str, value: &T) -> Result<()> {
        let tree = self.db.open_tree(tree)?;
        tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// Save a flow under its deposit id and mark it as the current one
    pub fn save_flow(&self, state: &FlowState) -> Result<()> {
        let tree = self.db.open_tree(FLOW_TREE)?;
        let bytes = serde_json::to_vec(state)?;

        if let Some(deposit_id) = &state.deposit_id {
            tree.insert(Self::flow_key(deposit_id).as_bytes(), bytes.clone())?;
        }
        tree.insert(CURRENT_FLOW_KEY.as_bytes(), bytes)?;
        tree.flush()?;

        tracing::debug!(
            deposit_id = ?state.deposit_id,
            step = %state.current_step,
            "flow saved"
        );
        Ok(())
    }

    pub fn load_flow(&self, deposit_id: &str) -> Result<Option<FlowState>> {
        self.read(FLOW_TREE, &Self::flow_key(deposit_id))
    }

    /// Last saved flow, whichever deposit it belongs to
    pub fn current_flow(&self) -> Result<Option<FlowState>> {
        self.read(FLOW_TREE, CURRENT_FLOW_KEY)
    }

    /// Forget a flow; clears the current marker if it points at the same deposit
    pub fn clear_flow(&self, deposit_id: &str) -> Result<()> {
        let tree = self.db.open_tree(FLOW_TREE)?;
        tree.remove(Self::flow_key(deposit_id).as_bytes())?;

        let current: Option<FlowState> = self.current_flow()?;
        if current.and_then(|s| s.deposit_id).as_deref() == Some(deposit_id) {
            tree.remove(CURRENT_FLOW_KEY.as_bytes())?;
        }
        tree.flush()?;
        Ok(())
    }

    pub fn save_buckets(&self, snapshot: &BucketSnapshot) -> Result<()> {
        self.write(BUCKETS_TREE, BUCKETS_KEY, snapshot)
    }

    pub fn load_buckets(&self) -> Result<Option<BucketSnapshot>> {
        self.read(BUCKETS_TREE, BUCKETS_KEY)
    }
}
