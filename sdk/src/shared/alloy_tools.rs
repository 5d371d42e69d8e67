use alloy::{
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use anyhow::Error;
use std::str::FromStr;
use tracing::debug;

/// Connects to `rpc_url` (http or ws). With a private key the provider signs and fills
/// transactions locally and the signer address is returned alongside it.
pub async fn construct_alloy_provider(
    private_key: Option<&str>,
    rpc_url: &str,
) -> Result<(DynProvider, Option<Address>), Error> {
    match private_key {
        Some(private_key) => {
            debug!(
                "Creating alloy provider with URL: {} and private key signer.",
                rpc_url
            );
            let signer = PrivateKeySigner::from_str(private_key)?;
            let signer_address: Address = signer.address();

            Ok((
                ProviderBuilder::new()
                    .wallet(signer)
                    .connect(rpc_url)
                    .await
                    .map_err(|e| Error::msg(format!("Failed to connect to {rpc_url}: {e}")))?
                    .erased(),
                Some(signer_address),
            ))
        }
        None => {
            debug!("Creating read-only alloy provider with URL: {}", rpc_url);
            Ok((
                ProviderBuilder::new()
                    .connect(rpc_url)
                    .await
                    .map_err(|e| Error::msg(format!("Failed to connect to {rpc_url}: {e}")))?
                    .erased(),
                None,
            ))
        }
    }
}
