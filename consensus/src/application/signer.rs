use super::Broadcaster;
use crate::{
    processor::{Origin, Processor},
    storage::Repository,
    types::{Epoch, Signature},
    Error,
};
use relay_cryptography::{KeyTag, PrivateKey};
use std::collections::HashMap;
use tracing::info;

/// Signs messages with this node's keys and shares the signatures.
pub struct Signer<R: Repository, B: Broadcaster> {
    processor: Processor<R>,
    broadcaster: B,
    keys: HashMap<KeyTag, PrivateKey>,
}

impl<R: Repository, B: Broadcaster> Signer<R, B> {
    /// Creates a signer. Keys whose type does not match their tag are never used.
    pub fn new(
        processor: Processor<R>,
        broadcaster: B,
        keys: impl IntoIterator<Item = (KeyTag, PrivateKey)>,
    ) -> Self {
        let keys = keys
            .into_iter()
            .filter(|(tag, key)| tag.key_type().ok() == Some(key.key_type()))
            .collect();
        Self {
            processor,
            broadcaster,
            keys,
        }
    }

    /// Signs `message` for `epoch` with the key under `key_tag`.
    ///
    /// The signature is recorded locally before it is broadcast, so this node counts its own
    /// contribution even if gossip never echoes it back.
    pub async fn sign(
        &mut self,
        key_tag: KeyTag,
        epoch: Epoch,
        message: &[u8],
    ) -> Result<Signature, Error> {
        let key = self.keys.get(&key_tag).ok_or(Error::MissingKey(key_tag))?;
        let (signature, message_hash) = key.sign(message)?;
        let signature = Signature::new(
            key_tag,
            epoch,
            message_hash.into(),
            signature.into(),
            key.public_key().raw().into(),
        );
        self.processor
            .process_signature(signature.clone(), Origin::Local)
            .await?;
        self.broadcaster.broadcast_signature(signature.clone()).await;
        info!(request_id = ?signature.request_id, epoch, %key_tag, "signed message");
        Ok(signature)
    }
}
