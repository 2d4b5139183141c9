use std::future::Future;
use std::time::Duration;

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{BlockNumber, TransactionReceipt, H256, U256};
use eyre::{Context, ContextCompat};

use super::ChainReader;
use crate::config::RpcConfig;
use crate::types::{Block, BlockSelector, Header, Receipt, Transaction};

/// Reads chain data from a node over JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcChain {
    provider: Provider<Http>,
    timeout: Duration,
}

impl RpcChain {
    pub fn new(config: &RpcConfig) -> eyre::Result<Self> {
        let provider = Provider::<Http>::try_from(config.http_url.as_str())?;

        Ok(Self {
            provider,
            timeout: config.timeout,
        })
    }

    async fn with_timeout<T, F>(&self, method: &str, fut: F) -> eyre::Result<T>
    where
        F: Future<Output = Result<T, ethers::providers::ProviderError>>,
    {
        let result = tokio::time::timeout(self.timeout, fut)
            .await
            .with_context(|| format!("{method} timed out"))?;

        result.with_context(|| format!("{method} failed"))
    }

    async fn block_receipts(
        &self,
        block: serde_json::Value,
    ) -> eyre::Result<Option<Vec<Receipt>>> {
        let receipts: Option<Vec<TransactionReceipt>> = self
            .with_timeout(
                "eth_getBlockReceipts",
                self.provider.request("eth_getBlockReceipts", [block]),
            )
            .await?;

        receipts
            .map(|receipts| receipts.iter().map(convert_receipt).collect())
            .transpose()
    }
}

#[async_trait::async_trait]
impl ChainReader for RpcChain {
    async fn header_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Header>> {
        let block = self
            .with_timeout(
                "eth_getBlockByNumber",
                self.provider.get_block(BlockNumber::from(selector)),
            )
            .await?;

        block.as_ref().map(convert_header).transpose()
    }

    async fn block_by_number(
        &self,
        selector: BlockSelector,
    ) -> eyre::Result<Option<Block>> {
        let block = self
            .with_timeout(
                "eth_getBlockByNumber",
                self.provider.get_block_with_txs(BlockNumber::from(selector)),
            )
            .await?;

        block.as_ref().map(convert_block).transpose()
    }

    async fn receipts(
        &self,
        block_hash: H256,
    ) -> eyre::Result<Option<Vec<Receipt>>> {
        self.block_receipts(serde_json::to_value(block_hash)?).await
    }

    async fn pending_block_and_receipts(
        &self,
    ) -> Option<(Block, Vec<Receipt>)> {
        let pending = async {
            let Some(block) =
                self.block_by_number(BlockSelector::Pending).await?
            else {
                return Ok(None);
            };

            let receipts = if block.transactions.is_empty() {
                vec![]
            } else {
                self.block_receipts(serde_json::to_value(
                    BlockNumber::Pending,
                )?)
                .await?
                .context("Node does not serve pending receipts")?
            };

            eyre::Result::<_>::Ok(Some((block, receipts)))
        };

        match pending.await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::debug!(error = ?err, "Pending block unavailable");

                None
            }
        }
    }

    async fn finalized_block(&self) -> eyre::Result<Option<Block>> {
        self.block_by_number(BlockSelector::Finalized).await
    }
}

fn to_u64(value: U256, field: &str) -> eyre::Result<u64> {
    u64::try_from(value)
        .map_err(|_| eyre::eyre!("{field} does not fit in u64: {value}"))
}

fn convert_header<T>(block: &ethers::types::Block<T>) -> eyre::Result<Header> {
    let number = block.number.context("Missing block number")?.as_u64();

    Ok(Header {
        number,
        // Pending blocks have no hash yet
        hash: block.hash.unwrap_or_default(),
        gas_limit: to_u64(block.gas_limit, "gas limit")?,
        gas_used: to_u64(block.gas_used, "gas used")?,
        base_fee: block.base_fee_per_gas,
    })
}

fn convert_block(
    block: &ethers::types::Block<ethers::types::Transaction>,
) -> eyre::Result<Block> {
    let header = convert_header(block)?;

    let transactions = block
        .transactions
        .iter()
        .map(|tx| {
            Ok(Transaction {
                hash: tx.hash,
                gas: to_u64(tx.gas, "transaction gas")?,
            })
        })
        .collect::<eyre::Result<Vec<_>>>()?;

    Ok(Block {
        header,
        transactions,
    })
}

fn convert_receipt(receipt: &TransactionReceipt) -> eyre::Result<Receipt> {
    let gas_used = receipt.gas_used.context("Missing receipt gas used")?;

    Ok(Receipt {
        transaction_hash: receipt.transaction_hash,
        gas_used: to_u64(gas_used, "receipt gas used")?,
    })
}
