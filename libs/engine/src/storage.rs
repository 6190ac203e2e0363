//! Storage collaborator interfaces
//!
//! The core never touches disk. The surrounding node implements these traits
//! over its key-value engine and hands snapshots in, writes results out.
//! Writes are idempotent upserts scoped to a beacon height, so replaying a
//! block commit is harmless.

use anyhow::Result;
use sharddex_types::{PoolPairId, TokenId};

use crate::params::Params;
use crate::pool_pair::PoolPairState;
use crate::staking::StakingPoolState;

/// Read access to committed exchange state.
pub trait StateReader {
    fn pool_pair(&self, pool_pair_id: &PoolPairId) -> Result<Option<PoolPairState>>;
    fn pool_pair_ids(&self) -> Result<Vec<PoolPairId>>;
    fn staking_pool(&self, staking_token: &TokenId) -> Result<Option<StakingPoolState>>;
    fn staking_pool_ids(&self) -> Result<Vec<TokenId>>;
    fn params(&self) -> Result<Params>;
}

/// Write access for committing a processed block.
pub trait StateWriter {
    fn put_pool_pair(
        &mut self,
        height: u64,
        pool_pair_id: &PoolPairId,
        state: &PoolPairState,
    ) -> Result<()>;
    fn put_staking_pool(
        &mut self,
        height: u64,
        staking_token: &TokenId,
        state: &StakingPoolState,
    ) -> Result<()>;
    fn put_params(&mut self, height: u64, params: &Params) -> Result<()>;
}
