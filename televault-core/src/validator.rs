//! Authorization validator
//!
//! Stateless checks that a dual authorization covers exactly the canonical
//! message recomputed from the request and the holder's current nonce, and
//! that both signatures recover to the expected identities. Nothing here
//! mutates state, so validation can be repeated freely as a dry run.

use crate::error::{AuthError, SignerRole};
use crate::id::{Amount, Identity, ItemId, Nonce};
use crate::message::CanonicalMessage;
use crate::request::{DualAuthorization, PawnRequest};
use crate::signature::{recover, Digest32, Signature};
use log::debug;

/// Validates dual authorizations against a trusted backend identity
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationValidator {
    /// Identity the backend signature must recover to
    backend: Identity,

    /// Current time in unix seconds, compared against deadlines
    now: u64,

    /// Reject authorizations without a deadline
    require_deadline: bool,
}

impl AuthorizationValidator {
    pub fn new(backend: Identity) -> Self {
        Self {
            backend,
            now: 0,
            require_deadline: false,
        }
    }

    /// Evaluate deadlines at `now`
    pub fn at(mut self, now: u64) -> Self {
        self.now = now;
        self
    }

    pub fn require_deadline(mut self, require: bool) -> Self {
        self.require_deadline = require;
        self
    }

    /// Validate a pawn request submitted by `holder` whose current nonce is `current_nonce`
    pub fn validate_pawn(
        &self,
        request: &PawnRequest,
        holder: &Identity,
        current_nonce: Nonce,
    ) -> Result<(), AuthError> {
        request.check_input()?;
        let message = request.message(*holder, current_nonce);
        self.validate_message(&message, &request.authorization, holder)
    }

    /// Validate a release authorization signed by the depositor and the backend
    pub fn validate_release(
        &self,
        item_id: ItemId,
        authorization: &DualAuthorization,
        depositor: &Identity,
        current_nonce: Nonce,
    ) -> Result<(), AuthError> {
        if !item_id.is_valid() {
            return Err(crate::error::InputError::InvalidItemId.into());
        }
        let message = CanonicalMessage::release(item_id, *depositor, current_nonce);
        let message = match authorization.deadline {
            Some(deadline) => message.with_deadline(deadline),
            None => message,
        };
        self.validate_message(&message, authorization, depositor)
    }

    /// Check `authorization` against the recomputed `message`
    pub fn validate_message(
        &self,
        message: &CanonicalMessage,
        authorization: &DualAuthorization,
        holder: &Identity,
    ) -> Result<(), AuthError> {
        if self.require_deadline && message.deadline().is_none() {
            return Err(AuthError::MissingDeadline);
        }

        let digest = message.digest();
        if authorization.holder_digest != digest {
            debug!("holder digest mismatch for {}", holder);
            return Err(AuthError::DigestMismatch {
                signer: SignerRole::Holder,
            });
        }
        if authorization.backend_digest != digest {
            debug!("backend digest mismatch for {}", holder);
            return Err(AuthError::DigestMismatch {
                signer: SignerRole::Backend,
            });
        }

        if let Some(deadline) = message.deadline() {
            if self.now > deadline {
                return Err(AuthError::Expired {
                    deadline,
                    now: self.now,
                });
            }
        }

        if !recovers_to(&digest, &authorization.holder_signature, holder) {
            debug!("holder signature does not recover to {}", holder);
            return Err(AuthError::InvalidHolderSignature);
        }
        if !recovers_to(&digest, &authorization.backend_signature, &self.backend) {
            debug!("backend signature does not recover to {}", self.backend);
            return Err(AuthError::InvalidBackendSignature);
        }

        Ok(())
    }
}

fn recovers_to(digest: &Digest32, signature: &Signature, expected: &Identity) -> bool {
    matches!(recover(digest, signature), Ok(identity) if identity == *expected)
}

/// Validate a pawn authorization given as loose fields, without a deadline
#[allow(clippy::too_many_arguments)]
pub fn validate(
    item_id: ItemId,
    value_amount: Amount,
    claimed_holder_digest: Digest32,
    claimed_backend_digest: Digest32,
    holder_signature: Signature,
    backend_signature: Signature,
    holder: &Identity,
    current_nonce: Nonce,
    backend: &Identity,
) -> Result<(), AuthError> {
    let request = PawnRequest::new(
        item_id,
        value_amount,
        DualAuthorization {
            holder_digest: claimed_holder_digest,
            backend_digest: claimed_backend_digest,
            holder_signature,
            backend_signature,
            deadline: None,
        },
    );
    AuthorizationValidator::new(*backend).validate_pawn(&request, holder, current_nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;
    use crate::signature::LocalSigner;

    struct Parties {
        holder: LocalSigner,
        backend: LocalSigner,
        attacker: LocalSigner,
    }

    fn parties() -> Parties {
        Parties {
            holder: LocalSigner::from_secret_bytes(&[0x11; 32]).unwrap(),
            backend: LocalSigner::from_secret_bytes(&[0x22; 32]).unwrap(),
            attacker: LocalSigner::from_secret_bytes(&[0x33; 32]).unwrap(),
        }
    }

    fn pawn_request(parties: &Parties, nonce: Nonce) -> PawnRequest {
        let message = CanonicalMessage::pawn(ItemId(1), 100, parties.holder.identity(), nonce);
        let auth = DualAuthorization::sign(&message, &parties.holder, &parties.backend).unwrap();
        PawnRequest::new(ItemId(1), 100, auth)
    }

    #[test]
    fn test_valid_request() {
        let p = parties();
        let request = pawn_request(&p, 0);
        let validator = AuthorizationValidator::new(p.backend.identity());
        assert_eq!(
            validator.validate_pawn(&request, &p.holder.identity(), 0),
            Ok(())
        );
        // No side effects: validating again gives the same answer
        assert_eq!(
            validator.validate_pawn(&request, &p.holder.identity(), 0),
            Ok(())
        );
    }

    #[test]
    fn test_loose_field_contract() {
        let p = parties();
        let request = pawn_request(&p, 4);
        let auth = request.authorization;
        assert_eq!(
            validate(
                ItemId(1),
                100,
                auth.holder_digest,
                auth.backend_digest,
                auth.holder_signature,
                auth.backend_signature,
                &p.holder.identity(),
                4,
                &p.backend.identity(),
            ),
            Ok(())
        );
    }

    #[test]
    fn test_zero_inputs_fail_before_crypto() {
        let p = parties();
        let mut request = pawn_request(&p, 0);
        // Garbage signatures would fail recovery if it were attempted
        request.authorization.holder_signature = Signature::new(0, [0; 32], [0; 32]);
        let validator = AuthorizationValidator::new(p.backend.identity());

        request.item_id = ItemId(0);
        assert_eq!(
            validator.validate_pawn(&request, &p.holder.identity(), 0),
            Err(AuthError::InvalidInput(InputError::InvalidItemId))
        );

        request.item_id = ItemId(1);
        request.value_amount = 0;
        assert_eq!(
            validator.validate_pawn(&request, &p.holder.identity(), 0),
            Err(AuthError::InvalidInput(InputError::InvalidValueAmount))
        );
    }

    #[test]
    fn test_stale_nonce_is_digest_mismatch() {
        let p = parties();
        let request = pawn_request(&p, 0);
        let validator = AuthorizationValidator::new(p.backend.identity());
        assert_eq!(
            validator.validate_pawn(&request, &p.holder.identity(), 1),
            Err(AuthError::DigestMismatch {
                signer: SignerRole::Holder
            })
        );
    }

    #[test]
    fn test_backend_digest_must_match_too() {
        let p = parties();
        let mut request = pawn_request(&p, 0);
        request.authorization.backend_digest[0] ^= 1;
        let validator = AuthorizationValidator::new(p.backend.identity());
        assert_eq!(
            validator.validate_pawn(&request, &p.holder.identity(), 0),
            Err(AuthError::DigestMismatch {
                signer: SignerRole::Backend
            })
        );
    }

    #[test]
    fn test_attacker_signatures_rejected() {
        let p = parties();
        let validator = AuthorizationValidator::new(p.backend.identity());
        let message = CanonicalMessage::pawn(ItemId(1), 100, p.holder.identity(), 0);

        let forged_holder = DualAuthorization::sign(&message, &p.attacker, &p.backend).unwrap();
        assert_eq!(
            validator.validate_pawn(
                &PawnRequest::new(ItemId(1), 100, forged_holder),
                &p.holder.identity(),
                0
            ),
            Err(AuthError::InvalidHolderSignature)
        );

        let forged_backend = DualAuthorization::sign(&message, &p.holder, &p.attacker).unwrap();
        assert_eq!(
            validator.validate_pawn(
                &PawnRequest::new(ItemId(1), 100, forged_backend),
                &p.holder.identity(),
                0
            ),
            Err(AuthError::InvalidBackendSignature)
        );
    }

    #[test]
    fn test_single_bit_flips_never_succeed() {
        let p = parties();
        let request = pawn_request(&p, 0);
        let validator = AuthorizationValidator::new(p.backend.identity());
        let holder = p.holder.identity();

        for byte in 0..65 {
            for bit in 0..8 {
                let mut flipped = request;
                let mut bytes = flipped.authorization.holder_signature.to_bytes();
                bytes[byte] ^= 1 << bit;
                flipped.authorization.holder_signature = Signature::from_bytes(&bytes);
                assert_eq!(
                    validator.validate_pawn(&flipped, &holder, 0),
                    Err(AuthError::InvalidHolderSignature)
                );

                let mut flipped = request;
                let mut bytes = flipped.authorization.backend_signature.to_bytes();
                bytes[byte] ^= 1 << bit;
                flipped.authorization.backend_signature = Signature::from_bytes(&bytes);
                assert_eq!(
                    validator.validate_pawn(&flipped, &holder, 0),
                    Err(AuthError::InvalidBackendSignature)
                );
            }
        }
    }

    #[test]
    fn test_deadlines() {
        let p = parties();
        let holder = p.holder.identity();
        let message = CanonicalMessage::pawn(ItemId(1), 100, holder, 0).with_deadline(1_000);
        let auth = DualAuthorization::sign(&message, &p.holder, &p.backend).unwrap();
        let request = PawnRequest::new(ItemId(1), 100, auth);

        let validator = AuthorizationValidator::new(p.backend.identity()).require_deadline(true);
        assert_eq!(validator.at(1_000).validate_pawn(&request, &holder, 0), Ok(()));
        assert_eq!(
            validator.at(1_001).validate_pawn(&request, &holder, 0),
            Err(AuthError::Expired {
                deadline: 1_000,
                now: 1_001
            })
        );

        // Stretching the deadline changes the digest
        let mut stretched = request;
        stretched.authorization.deadline = Some(2_000);
        assert!(matches!(
            validator.at(1_001).validate_pawn(&stretched, &holder, 0),
            Err(AuthError::DigestMismatch { .. })
        ));

        let undated = pawn_request(&p, 0);
        assert_eq!(
            validator.validate_pawn(&undated, &holder, 0),
            Err(AuthError::MissingDeadline)
        );
    }

    #[test]
    fn test_release_authorization() {
        let p = parties();
        let depositor = p.holder.identity();
        let message = CanonicalMessage::release(ItemId(9), depositor, 2);
        let auth = DualAuthorization::sign(&message, &p.holder, &p.backend).unwrap();
        let validator = AuthorizationValidator::new(p.backend.identity());

        assert_eq!(validator.validate_release(ItemId(9), &auth, &depositor, 2), Ok(()));
        assert!(matches!(
            validator.validate_release(ItemId(9), &auth, &depositor, 3),
            Err(AuthError::DigestMismatch { .. })
        ));
        assert!(matches!(
            validator.validate_release(ItemId(8), &auth, &depositor, 2),
            Err(AuthError::DigestMismatch { .. })
        ));

        // A pawn authorization is never a release authorization
        let pawn = pawn_request(&p, 2);
        assert!(matches!(
            validator.validate_release(ItemId(1), &pawn.authorization, &depositor, 2),
            Err(AuthError::DigestMismatch { .. })
        ));
    }
}
