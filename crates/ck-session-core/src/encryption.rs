use ck_api_types::{EncryptedInput, FheType, InputValue};
use ck_client::{EncryptedInputBuilder, EncryptionClient};
use ck_crypto::SignerCapability;
use tracing::debug;

use crate::error::{EncryptError, SignatureError};

/// Parses a UI-supplied value for an encrypted ABI parameter such as
/// `externalEuint32` or `ebool`.
pub fn parse_input_value(abi_type: &str, raw: &str) -> Result<InputValue, EncryptError> {
    let fhe_type = FheType::from_abi_name(abi_type).ok_or_else(|| EncryptError::UnsupportedType(abi_type.to_owned()))?;
    let value = raw.trim();
    let invalid = || EncryptError::InvalidValue {
        abi_type: abi_type.to_owned(),
        raw: raw.to_owned(),
    };

    let parsed = match fhe_type {
        FheType::Bool => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => InputValue::Bool(true),
            "false" | "0" => InputValue::Bool(false),
            _ => return Err(invalid()),
        },
        FheType::Uint8 => InputValue::U8(value.parse().map_err(|_| invalid())?),
        FheType::Uint16 => InputValue::U16(value.parse().map_err(|_| invalid())?),
        FheType::Uint32 => InputValue::U32(value.parse().map_err(|_| invalid())?),
        FheType::Uint64 => InputValue::U64(value.parse().map_err(|_| invalid())?),
        FheType::Uint128 => InputValue::U128(value.parse().map_err(|_| invalid())?),
        FheType::Uint256 => {
            let digits_ok = match value.strip_prefix("0x") {
                Some(hex_digits) => !hex_digits.is_empty() && hex_digits.len() <= 64 && hex::decode(pad_even(hex_digits)).is_ok(),
                None => !value.is_empty() && value.len() <= 78 && value.bytes().all(|b| b.is_ascii_digit()),
            };
            if !digits_ok {
                return Err(invalid());
            }
            InputValue::U256(value.to_owned())
        }
        FheType::Address => {
            let is_address = value.len() == 42 && value.starts_with("0x") && hex::decode(&value[2..]).is_ok();
            if !is_address {
                return Err(invalid());
            }
            InputValue::Address(value.to_owned())
        }
    };
    Ok(parsed)
}

fn pad_even(digits: &str) -> String {
    if digits.len() % 2 == 0 {
        digits.to_owned()
    } else {
        format!("0{digits}")
    }
}

/// Builds encrypted inputs bound to one contract and the signer's address.
pub struct EncryptionOrchestrator;

impl EncryptionOrchestrator {
    pub async fn encrypt<F>(
        client: &dyn EncryptionClient,
        signer: &dyn SignerCapability,
        contract_address: &str,
        build: F,
    ) -> Result<EncryptedInput, EncryptError>
    where
        F: FnOnce(&mut dyn EncryptedInputBuilder),
    {
        if contract_address.trim().is_empty() {
            return Err(EncryptError::MissingContractAddress);
        }

        let user_address = signer.address().await.map_err(SignatureError::from)?;
        let mut builder = client.create_encrypted_input(contract_address, &user_address);
        build(builder.as_mut());
        debug!("encrypting {} values for {}", builder.len(), contract_address);

        Ok(builder.encrypt().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use ck_crypto::Ed25519Signer;
    use ck_fhevm::mock::{MockCoprocessor, MockEncryptionClient, hardhat_relayer_metadata};
    use std::sync::Arc;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn client() -> MockEncryptionClient {
        MockEncryptionClient::new(31337, hardhat_relayer_metadata(31337), Arc::new(MockCoprocessor::default()))
    }

    #[test]
    fn parses_values_for_each_abi_family() -> Result<()> {
        assert_eq!(parse_input_value("externalEbool", "true")?, InputValue::Bool(true));
        assert_eq!(parse_input_value("euint8", "255")?, InputValue::U8(255));
        assert_eq!(parse_input_value("externalEuint64", " 42 ")?, InputValue::U64(42));
        assert_eq!(
            parse_input_value("euint256", "0xabc")?,
            InputValue::U256("0xabc".to_owned())
        );
        assert_eq!(
            parse_input_value("eaddress", CONTRACT)?,
            InputValue::Address(CONTRACT.to_owned())
        );
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_and_unknown_types() {
        assert!(matches!(
            parse_input_value("euint8", "256"),
            Err(EncryptError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_input_value("eaddress", "0x1234"),
            Err(EncryptError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_input_value("uint64", "1"),
            Err(EncryptError::UnsupportedType(_))
        ));
    }

    #[tokio::test]
    async fn encrypt_returns_one_handle_per_value() -> Result<()> {
        let client = client();
        let signer = Ed25519Signer::new_random();

        let input = EncryptionOrchestrator::encrypt(&client, &signer, CONTRACT, |builder| {
            builder.add(InputValue::U32(7));
            builder.add(InputValue::Bool(false));
        })
        .await?;

        assert_eq!(input.handles.len(), 2);
        assert!(input.input_proof.starts_with("0x"));
        Ok(())
    }

    #[tokio::test]
    async fn encrypt_requires_a_contract() {
        let client = client();
        let signer = Ed25519Signer::new_random();
        let err = EncryptionOrchestrator::encrypt(&client, &signer, "  ", |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, EncryptError::MissingContractAddress);
    }
}
