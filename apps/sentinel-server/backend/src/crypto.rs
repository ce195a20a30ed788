//! Key issuance and public key folding for linkable ring signatures.
//!
//! The ring signature scheme is opaque to the rest of the server: everything
//! goes through [`RingCrypto`], so tests can swap in a mock and the scheme can
//! change without touching the election logic.

use std::sync::Arc;

use base64::Engine;
use openssl::{
    bn::{BigNum, BigNumContext, BigNumContextRef, BigNumRef},
    ec::{EcGroup, EcKey, EcPoint, EcPointRef, PointConversionForm},
    hash::{hash, Hasher, MessageDigest},
    nid::Nid,
    pkey::PKey,
};

/// The smallest ring a signature can be made over.
pub const MIN_RING_SIZE: usize = 2;

const FOLDED_PEM_LABEL: &str = "FOLDED PUBLIC KEYS";
const SIGNATURE_PEM_LABEL: &str = "RING SIGNATURE";

/// Byte length of a prime256v1 scalar.
const SCALAR_LEN: usize = 32;

const HASH_TO_POINT_DOMAIN: &[u8] = b"sentinelvote/hash-to-point";

#[cfg_attr(test, mockall::automock)]
pub trait RingCrypto {
    /// Generates a PEM-encoded private key.
    fn generate_private_key(&self) -> Result<String, CryptoError>;

    /// Derives the PEM-encoded public key for a PEM-encoded private key.
    fn derive_public_key(&self, private_key: &str) -> Result<String, CryptoError>;

    /// Folds an ordered list of PEM-encoded public keys into the group a ring
    /// signature is made over.
    fn fold_public_keys(&self, public_keys: &[String]) -> Result<String, CryptoError>;

    /// Signs `message` on behalf of the ring in `folded_public_keys` with a
    /// linkable ring signature. The signer's public key must be in the ring.
    fn sign(
        &self,
        folded_public_keys: &str,
        private_key: &str,
        message: &[u8],
    ) -> Result<String, CryptoError>;
}

pub type DynRingCrypto = Arc<dyn RingCrypto + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("at least {required} public keys are required, found {found}")]
    InsufficientKeys { required: usize, found: usize },

    #[error("invalid public key at position {index}: {reason}")]
    InvalidKey { index: usize, reason: String },

    #[error("duplicate public key at position {index}")]
    DuplicateKey { index: usize },

    #[error("malformed folded public keys: {0}")]
    MalformedFoldedKeys(String),

    #[error("malformed ring signature: {0}")]
    MalformedSignature(String),

    #[error("signing failed: the signer's public key is not in the ring")]
    SignerNotInRing,

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    #[error("openssl error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

pub fn generate_key_pair(crypto: &(dyn RingCrypto + Send + Sync)) -> Result<KeyPair, CryptoError> {
    let private_key = crypto.generate_private_key()?;
    let public_key = crypto.derive_public_key(&private_key)?;
    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// Parameters the folded group is computed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldingConfig {
    /// OpenSSL name of the digest, e.g. `sha3-256`.
    pub digest: String,

    /// Tag recorded in the folded group describing how it was derived.
    pub mode: String,
}

impl Default for FoldingConfig {
    fn default() -> Self {
        Self {
            digest: "sha3-256".to_owned(),
            mode: "hashes".to_owned(),
        }
    }
}

/// [`RingCrypto`] over prime256v1 keys using OpenSSL.
#[derive(Debug, Clone, Default)]
pub struct OpensslRingCrypto {
    config: FoldingConfig,
}

impl OpensslRingCrypto {
    pub fn new(config: FoldingConfig) -> Self {
        Self { config }
    }

    fn group() -> Result<EcGroup, CryptoError> {
        Ok(EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?)
    }

    fn digest(&self) -> Result<MessageDigest, CryptoError> {
        MessageDigest::from_name(&self.config.digest)
            .ok_or_else(|| CryptoError::UnsupportedDigest(self.config.digest.clone()))
    }

    /// Checks a signature produced by [`RingCrypto::sign`] against the ring
    /// and message it claims to sign.
    pub fn verify(
        &self,
        folded_public_keys: &str,
        message: &[u8],
        signature: &str,
    ) -> Result<bool, CryptoError> {
        let curve = Curve::new(self.digest()?)?;
        let mut ctx = BigNumContext::new()?;
        let ring = Ring::from_folded(&curve, folded_public_keys, &mut ctx)?;

        let (headers, body) = decode_pem(SIGNATURE_PEM_LABEL, signature)
            .map_err(CryptoError::MalformedSignature)?;
        let key_image = headers
            .iter()
            .find(|(name, _)| name == "KeyImage")
            .ok_or_else(|| CryptoError::MalformedSignature("missing KeyImage".to_owned()))
            .and_then(|(_, value)| {
                hex::decode(value).map_err(|e| CryptoError::MalformedSignature(e.to_string()))
            })?;
        let key_image = EcPoint::from_bytes(&curve.group, &key_image, &mut ctx)
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;

        if body.len() != SCALAR_LEN * (ring.members.len() + 1) {
            return Err(CryptoError::MalformedSignature(format!(
                "expected {} scalars for a ring of {}",
                ring.members.len() + 1,
                ring.members.len()
            )));
        }
        let first_challenge = BigNum::from_slice(&body[..SCALAR_LEN])?;
        let responses = body[SCALAR_LEN..]
            .chunks(SCALAR_LEN)
            .map(BigNum::from_slice)
            .collect::<Result<Vec<_>, _>>()?;

        let mut challenge = BigNum::from_slice(&body[..SCALAR_LEN])?;
        for (member, response) in ring.members.iter().zip(&responses) {
            let (l, r) = curve.commitments(member, response, &challenge, &key_image, &mut ctx)?;
            challenge = curve.challenge(&ring.digest, message, &l, &r, &mut ctx)?;
        }
        Ok(challenge == first_challenge)
    }
}

impl RingCrypto for OpensslRingCrypto {
    fn generate_private_key(&self) -> Result<String, CryptoError> {
        let group = Self::group()?;
        let key = EcKey::generate(&group)?;
        Ok(String::from_utf8_lossy(&key.private_key_to_pem()?).into_owned())
    }

    fn derive_public_key(&self, private_key: &str) -> Result<String, CryptoError> {
        let key = EcKey::private_key_from_pem(private_key.as_bytes())?;
        Ok(String::from_utf8_lossy(&key.public_key_to_pem()?).into_owned())
    }

    fn fold_public_keys(&self, public_keys: &[String]) -> Result<String, CryptoError> {
        if public_keys.len() < MIN_RING_SIZE {
            return Err(CryptoError::InsufficientKeys {
                required: MIN_RING_SIZE,
                found: public_keys.len(),
            });
        }

        let digest = self.digest()?;

        let mut ders: Vec<Vec<u8>> = Vec::with_capacity(public_keys.len());
        for (index, pem) in public_keys.iter().enumerate() {
            let der = public_key_der(pem).map_err(|reason| CryptoError::InvalidKey { index, reason })?;
            if ders.contains(&der) {
                return Err(CryptoError::DuplicateKey { index });
            }
            ders.push(der);
        }

        let mut body = Vec::new();
        for der in &ders {
            body.extend_from_slice(&(der.len() as u32).to_be_bytes());
            body.extend_from_slice(der);
        }
        let group_digest = hash(digest, &body)?;

        Ok(encode_pem(
            FOLDED_PEM_LABEL,
            &[
                ("DigestAlgorithm", self.config.digest.clone()),
                ("Origin", self.config.mode.clone()),
                ("KeyCount", ders.len().to_string()),
                ("Digest", hex::encode(group_digest)),
            ],
            &body,
        ))
    }

    fn sign(
        &self,
        folded_public_keys: &str,
        private_key: &str,
        message: &[u8],
    ) -> Result<String, CryptoError> {
        let curve = Curve::new(self.digest()?)?;
        let mut ctx = BigNumContext::new()?;
        let ring = Ring::from_folded(&curve, folded_public_keys, &mut ctx)?;

        let key = EcKey::private_key_from_pem(private_key.as_bytes())?;
        if key.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
            return Err(CryptoError::SignerNotInRing);
        }
        let mut signer = None;
        for (index, member) in ring.members.iter().enumerate() {
            if member.point.eq(&curve.group, key.public_key(), &mut ctx)? {
                signer = Some(index);
                break;
            }
        }
        let signer = signer.ok_or(CryptoError::SignerNotInRing)?;
        let size = ring.members.len();

        let mut key_image = EcPoint::new(&curve.group)?;
        key_image.mul(
            &curve.group,
            &ring.members[signer].hashed,
            key.private_key(),
            &mut ctx,
        )?;

        let mut challenges = (0..size)
            .map(|_| BigNum::new())
            .collect::<Result<Vec<_>, _>>()?;
        let mut responses = (0..size)
            .map(|_| BigNum::new())
            .collect::<Result<Vec<_>, _>>()?;

        let mut nonce = BigNum::new()?;
        curve.order.rand_range(&mut nonce)?;
        let mut l = EcPoint::new(&curve.group)?;
        l.mul_generator(&curve.group, &nonce, &mut ctx)?;
        let mut r = EcPoint::new(&curve.group)?;
        r.mul(&curve.group, &ring.members[signer].hashed, &nonce, &mut ctx)?;

        let mut index = (signer + 1) % size;
        challenges[index] = curve.challenge(&ring.digest, message, &l, &r, &mut ctx)?;
        while index != signer {
            curve.order.rand_range(&mut responses[index])?;
            let (l, r) = curve.commitments(
                &ring.members[index],
                &responses[index],
                &challenges[index],
                &key_image,
                &mut ctx,
            )?;
            let next = (index + 1) % size;
            challenges[next] = curve.challenge(&ring.digest, message, &l, &r, &mut ctx)?;
            index = next;
        }

        // closes the ring: s = nonce - c * x
        let mut cx = BigNum::new()?;
        cx.mod_mul(&challenges[signer], key.private_key(), &curve.order, &mut ctx)?;
        let mut closing = BigNum::new()?;
        closing.mod_sub(&nonce, &cx, &curve.order, &mut ctx)?;
        responses[signer] = closing;

        let mut body = challenges[0].to_vec_padded(SCALAR_LEN as i32)?;
        for response in &responses {
            body.extend(response.to_vec_padded(SCALAR_LEN as i32)?);
        }
        let key_image = key_image.to_bytes(&curve.group, PointConversionForm::COMPRESSED, &mut ctx)?;

        Ok(encode_pem(
            SIGNATURE_PEM_LABEL,
            &[
                ("DigestAlgorithm", self.config.digest.clone()),
                ("RingSize", size.to_string()),
                ("KeyImage", hex::encode(key_image)),
            ],
            &body,
        ))
    }
}

/// prime256v1 with the digest that challenges are hashed with.
struct Curve {
    group: EcGroup,
    order: BigNum,
    digest: MessageDigest,
}

impl Curve {
    fn new(digest: MessageDigest) -> Result<Self, CryptoError> {
        let group = OpensslRingCrypto::group()?;
        let mut order = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        group.order(&mut order, &mut ctx)?;
        Ok(Self {
            group,
            order,
            digest,
        })
    }

    /// `L = s·G + c·P` and `R = s·H(P) + c·I` for one ring member.
    fn commitments(
        &self,
        member: &RingMember,
        response: &BigNumRef,
        challenge: &BigNumRef,
        key_image: &EcPointRef,
        ctx: &mut BigNumContextRef,
    ) -> Result<(EcPoint, EcPoint), CryptoError> {
        let mut l = EcPoint::new(&self.group)?;
        l.mul_full(&self.group, response, &member.point, challenge, ctx)?;

        let mut hashed = EcPoint::new(&self.group)?;
        hashed.mul(&self.group, &member.hashed, response, ctx)?;
        let mut image = EcPoint::new(&self.group)?;
        image.mul(&self.group, key_image, challenge, ctx)?;
        let mut r = EcPoint::new(&self.group)?;
        r.add(&self.group, &hashed, &image, ctx)?;

        Ok((l, r))
    }

    fn challenge(
        &self,
        ring_digest: &[u8],
        message: &[u8],
        l: &EcPointRef,
        r: &EcPointRef,
        ctx: &mut BigNumContextRef,
    ) -> Result<BigNum, CryptoError> {
        let mut hasher = Hasher::new(self.digest)?;
        hasher.update(ring_digest)?;
        hasher.update(&l.to_bytes(&self.group, PointConversionForm::COMPRESSED, ctx)?)?;
        hasher.update(&r.to_bytes(&self.group, PointConversionForm::COMPRESSED, ctx)?)?;
        hasher.update(message)?;
        let raw = BigNum::from_slice(&hasher.finish()?)?;
        let mut challenge = BigNum::new()?;
        challenge.nnmod(&raw, &self.order, ctx)?;
        Ok(challenge)
    }

    /// Maps an encoded point onto the curve by hashing it to candidate x
    /// coordinates until one lands on the curve.
    fn hash_to_point(
        &self,
        encoded: &[u8],
        ctx: &mut BigNumContextRef,
    ) -> Result<EcPoint, CryptoError> {
        for counter in 0..=u32::MAX {
            let mut hasher = Hasher::new(MessageDigest::sha256())?;
            hasher.update(HASH_TO_POINT_DOMAIN)?;
            hasher.update(&counter.to_be_bytes())?;
            hasher.update(encoded)?;
            let x = hasher.finish()?;

            let mut candidate = Vec::with_capacity(SCALAR_LEN + 1);
            candidate.push(0x02);
            candidate.extend_from_slice(&x);
            if let Ok(point) = EcPoint::from_bytes(&self.group, &candidate, ctx) {
                return Ok(point);
            }
        }
        Err(CryptoError::MalformedFoldedKeys(
            "cannot map public key onto the curve".to_owned(),
        ))
    }
}

struct RingMember {
    point: EcPoint,
    /// The member's public key hashed onto the curve.
    hashed: EcPoint,
}

/// The public keys unpacked from a folded group.
struct Ring {
    /// Digest of the folded body, binding every challenge to this ring.
    digest: Vec<u8>,
    members: Vec<RingMember>,
}

impl Ring {
    fn from_folded(
        curve: &Curve,
        folded_public_keys: &str,
        ctx: &mut BigNumContextRef,
    ) -> Result<Self, CryptoError> {
        let (_, body) = decode_pem(FOLDED_PEM_LABEL, folded_public_keys)
            .map_err(CryptoError::MalformedFoldedKeys)?;

        let mut members = Vec::new();
        let mut rest = body.as_slice();
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(CryptoError::MalformedFoldedKeys("truncated length".to_owned()));
            }
            let (len, tail) = rest.split_at(4);
            let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
            if tail.len() < len {
                return Err(CryptoError::MalformedFoldedKeys("truncated key".to_owned()));
            }
            let (der, tail) = tail.split_at(len);
            rest = tail;

            let index = members.len();
            let invalid = |reason: String| CryptoError::InvalidKey { index, reason };
            let key = PKey::public_key_from_der(der).map_err(|e| invalid(e.to_string()))?;
            let ec_key = key.ec_key().map_err(|_| invalid("not an EC key".to_owned()))?;
            if ec_key.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
                return Err(invalid("not a prime256v1 key".to_owned()));
            }
            let point = ec_key.public_key().to_owned(&curve.group)?;
            let encoded = point.to_bytes(&curve.group, PointConversionForm::COMPRESSED, ctx)?;
            let hashed = curve.hash_to_point(&encoded, ctx)?;
            members.push(RingMember { point, hashed });
        }

        if members.len() < MIN_RING_SIZE {
            return Err(CryptoError::InsufficientKeys {
                required: MIN_RING_SIZE,
                found: members.len(),
            });
        }

        Ok(Self {
            digest: hash(curve.digest, &body)?.to_vec(),
            members,
        })
    }
}

fn public_key_der(pem: &str) -> Result<Vec<u8>, String> {
    let key = PKey::public_key_from_pem(pem.as_bytes()).map_err(|e| e.to_string())?;
    let ec_key = key.ec_key().map_err(|_| "not an EC key".to_owned())?;
    if ec_key.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
        return Err("not a prime256v1 key".to_owned());
    }
    key.public_key_to_der().map_err(|e| e.to_string())
}

/// Splits a PEM block with the given label into its headers and decoded body.
fn decode_pem(label: &str, pem: &str) -> Result<(Vec<(String, String)>, Vec<u8>), String> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut lines = pem.trim().lines();
    if lines.next().map(str::trim) != Some(begin.as_str()) {
        return Err(format!("expected {begin}"));
    }

    let mut headers = Vec::new();
    let mut encoded = String::new();
    let mut in_body = false;
    let mut ended = false;
    for line in lines.map(str::trim) {
        if line == end {
            ended = true;
            break;
        }
        if in_body {
            encoded.push_str(line);
        } else if line.is_empty() {
            in_body = true;
        } else if let Some((name, value)) = line.split_once(": ") {
            headers.push((name.to_owned(), value.to_owned()));
        } else {
            in_body = true;
            encoded.push_str(line);
        }
    }
    if !ended {
        return Err(format!("missing {end}"));
    }

    let body = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| e.to_string())?;
    Ok((headers, body))
}

fn encode_pem(label: &str, headers: &[(&str, String)], body: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(body);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for (name, value) in headers {
        pem.push_str(&format!("{name}: {value}\n"));
    }
    pem.push('\n');
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}
