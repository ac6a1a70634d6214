//! External funds-transfer boundary.
//!
//! The engine never moves money itself: it asks this trait to pull budget
//! into escrow and to release payouts/refunds out of it. Implementations
//! must make each call atomic (fully succeeds or fails cleanly); the
//! transaction hooks group multiple releases into one all-or-nothing
//! settlement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use task_types::{Address, NativeAmount, Result, TaskError, TokenAmount};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait FundsTransfer: Send + Sync {
    /// Pulls native currency from `from` into the escrow pool.
    async fn escrow_native(&self, from: Address, amount: NativeAmount) -> Result<()>;

    /// Pulls `token` balance from `from` into the escrow pool.
    async fn escrow_token(&self, token: Address, from: Address, amount: TokenAmount)
        -> Result<()>;

    /// Releases native currency from the escrow pool to `to`.
    async fn release_native(&self, to: Address, amount: NativeAmount) -> Result<()>;

    /// Releases `token` balance from the escrow pool to `to`.
    async fn release_token(&self, token: Address, to: Address, amount: TokenAmount)
        -> Result<()>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;
}

type NativeBalances = HashMap<Address, u128>;
type TokenBalances = HashMap<(Address, Address), u128>;
type Backup = Option<(NativeBalances, TokenBalances)>;

/// In-memory funds implementation with snapshot-based rollback. Used by the
/// test suites; the pool account plays the role of the escrow contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFundsConfig {
    pub pool: Address,
}

impl Default for MemoryFundsConfig {
    fn default() -> Self {
        Self {
            pool: Address::from_bytes([0xEE; 32]),
        }
    }
}

pub struct MemoryFunds {
    config: MemoryFundsConfig,
    native: Arc<RwLock<NativeBalances>>,
    tokens: Arc<RwLock<TokenBalances>>,
    backup: Arc<RwLock<Backup>>,
}

impl Default for MemoryFunds {
    fn default() -> Self {
        Self::new(MemoryFundsConfig::default())
    }
}

impl MemoryFunds {
    pub fn new(config: MemoryFundsConfig) -> Self {
        Self {
            config,
            native: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            backup: Arc::new(RwLock::new(None)),
        }
    }

    /// Mints native currency to an account (test setup).
    pub async fn deposit_native(&self, to: Address, amount: NativeAmount) {
        let mut native = self.native.write().await;
        *native.entry(to).or_insert(0) += amount.to_base_units();
    }

    /// Mints token balance to an account (test setup).
    pub async fn deposit_token(&self, token: Address, to: Address, amount: TokenAmount) {
        let mut tokens = self.tokens.write().await;
        *tokens.entry((token, to)).or_insert(0) += amount.to_base_units();
    }

    pub async fn native_balance(&self, address: Address) -> u128 {
        let native = self.native.read().await;
        native.get(&address).copied().unwrap_or(0)
    }

    pub async fn token_balance(&self, token: Address, address: Address) -> u128 {
        let tokens = self.tokens.read().await;
        tokens.get(&(token, address)).copied().unwrap_or(0)
    }

    /// Native balance currently held by the escrow pool.
    pub async fn pool_native(&self) -> u128 {
        self.native_balance(self.config.pool).await
    }

    /// Token balance currently held by the escrow pool.
    pub async fn pool_token(&self, token: Address) -> u128 {
        self.token_balance(token, self.config.pool).await
    }

    async fn move_native(&self, from: Address, to: Address, amount: u128) -> Result<()> {
        let mut native = self.native.write().await;
        let balance = native.get(&from).copied().unwrap_or(0);
        if balance < amount {
            return Err(TaskError::NativeTransferFailed);
        }
        native.insert(from, balance - amount);
        *native.entry(to).or_insert(0) += amount;
        Ok(())
    }

    async fn move_token(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let balance = tokens.get(&(token, from)).copied().unwrap_or(0);
        if balance < amount {
            return Err(TaskError::TokenTransferFailed { token });
        }
        tokens.insert((token, from), balance - amount);
        *tokens.entry((token, to)).or_insert(0) += amount;
        Ok(())
    }
}

#[async_trait]
impl FundsTransfer for MemoryFunds {
    async fn escrow_native(&self, from: Address, amount: NativeAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.move_native(from, self.config.pool, amount.to_base_units())
            .await?;
        info!(from = %from, amount = %amount, "Native budget escrowed");
        Ok(())
    }

    async fn escrow_token(
        &self,
        token: Address,
        from: Address,
        amount: TokenAmount,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.move_token(token, from, self.config.pool, amount.to_base_units())
            .await?;
        info!(token = %token, from = %from, amount = %amount, "Token budget escrowed");
        Ok(())
    }

    async fn release_native(&self, to: Address, amount: NativeAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.move_native(self.config.pool, to, amount.to_base_units())
            .await?;
        info!(to = %to, amount = %amount, "Native funds released");
        Ok(())
    }

    async fn release_token(&self, token: Address, to: Address, amount: TokenAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.move_token(token, self.config.pool, to, amount.to_base_units())
            .await?;
        info!(token = %token, to = %to, amount = %amount, "Token funds released");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let native = self.native.read().await;
        let tokens = self.tokens.read().await;
        let mut backup = self.backup.write().await;
        *backup = Some((native.clone(), tokens.clone()));
        debug!("Funds transaction began (snapshot created)");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        *backup = None;
        debug!("Funds transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        // Lock order matches begin_transaction: native, tokens, backup.
        let mut native = self.native.write().await;
        let mut tokens = self.tokens.write().await;
        let mut backup = self.backup.write().await;
        if let Some((native_backup, token_backup)) = backup.take() {
            *native = native_backup;
            *tokens = token_backup;
            debug!("Funds transaction rolled back (snapshot restored)");
        }
        Ok(())
    }
}
