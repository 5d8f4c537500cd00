//! Apache-2 licensed Vapash implementation, a member of the Ethash family.
//!
//! A [`LightDAG`] holds the per-epoch cache and recomputes dataset items on
//! demand; a [`FullDAG`] materializes the whole dataset once, persisting it
//! under [`Config::dag_dir`] so later runs at the same epoch can reuse it.
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use vapash::{Config, FullDAG, Generated, LightDAG};
//!
//! # fn main() -> Result<(), vapash::Error> {
//! let config = Config::default();
//! let light = LightDAG::new(&config, 1_234_567)?;
//! let header_hash = Default::default();
//! let verified = light.hashimoto(header_hash, 42);
//!
//! if let Generated::Complete(full) = FullDAG::new(&light, |_| ControlFlow::Continue(()))? {
//!     assert_eq!(full.hashimoto(header_hash, 42), verified);
//! }
//! # Ok(())
//! # }
//! ```

// The reference algorithm used is from https://github.com/ethereum/wiki/wiki/Ethash

mod config;
mod dag;
mod dataset;
mod error;
pub mod io;
mod miller_rabin;

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::H256;
use sha3::{Digest, Keccak256, Keccak512};

pub use crate::config::{Config, DAG_MAGIC_NUM, EPOCH_LENGTH, REVISION};
pub use crate::dag::{FullDAG, LightDAG};
pub use crate::dataset::{make_dataset, Generated};
pub use crate::error::Error;

pub const MIX_BYTES: usize = 128;
pub const WORD_BYTES: usize = 4;
pub const HASH_BYTES: usize = 64;
pub const DATASET_PARENTS: usize = 256;
pub const CACHE_ROUNDS: usize = 3;
pub const ACCESSES: usize = 64;

const NODE_WORDS: usize = HASH_BYTES / WORD_BYTES;
const MIX_WORDS: usize = MIX_BYTES / WORD_BYTES;
const MIX_NODES: usize = MIX_WORDS / NODE_WORDS;

/// One 64-byte cache node or dataset item, as little-endian words.
pub type Node = [u32; NODE_WORDS];

pub fn keccak_512(data: &[u8]) -> [u8; 64] {
    let mut output = [0u8; 64];
    output.copy_from_slice(&Keccak512::digest(data));
    output
}

pub fn keccak_256(data: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    output.copy_from_slice(&Keccak256::digest(data));
    output
}

const FNV_PRIME: u32 = 0x01000193;

pub fn fnv(v1: u32, v2: u32) -> u32 {
    v1.wrapping_mul(FNV_PRIME) ^ v2
}

/// Folds `data` into `mix` lane by lane.
pub fn fnv_mix_hash(mix: &mut [u32], data: &[u32]) {
    for (m, d) in mix.iter_mut().zip(data) {
        *m = fnv(*m, *d);
    }
}

fn read_node(bytes: &[u8], index: usize) -> Node {
    let mut node = [0u32; NODE_WORDS];
    LittleEndian::read_u32_into(
        &bytes[index * HASH_BYTES..(index + 1) * HASH_BYTES],
        &mut node,
    );
    node
}

fn keccak_512_node(node: &Node) -> Node {
    let mut bytes = [0u8; HASH_BYTES];
    LittleEndian::write_u32_into(node, &mut bytes);
    let mut out = [0u32; NODE_WORDS];
    LittleEndian::read_u32_into(&keccak_512(&bytes), &mut out);
    out
}

/// Get the seedhash for a given epoch.
pub fn get_seedhash(epoch: u64) -> H256 {
    let mut s = [0u8; 32];
    for _ in 0..epoch {
        s = keccak_256(&s);
    }
    H256(s)
}

/// Make an Ethash cache using the given seed.
///
/// `cache.len()` must be a non-zero multiple of [`HASH_BYTES`]; trailing
/// bytes past the last whole node are left untouched.
pub fn make_cache(cache: &mut [u8], seed: H256) {
    let n = cache.len() / HASH_BYTES;
    if n == 0 {
        return;
    }

    cache[..HASH_BYTES].copy_from_slice(&keccak_512(seed.as_bytes()));
    for i in 1..n {
        let (last, next) = cache.split_at_mut(i * HASH_BYTES);
        next[..HASH_BYTES].copy_from_slice(&keccak_512(&last[(i - 1) * HASH_BYTES..]));
    }

    for _ in 0..CACHE_ROUNDS {
        for i in 0..n {
            let v = LittleEndian::read_u32(&cache[i * HASH_BYTES..]) as usize % n;
            let u = (i + n - 1) % n;
            let mut r = [0u8; HASH_BYTES];
            for (j, b) in r.iter_mut().enumerate() {
                *b = cache[u * HASH_BYTES + j] ^ cache[v * HASH_BYTES + j];
            }
            cache[i * HASH_BYTES..(i + 1) * HASH_BYTES].copy_from_slice(&keccak_512(&r));
        }
    }
}

/// Compute dataset item `i` from a cache of at least one node.
pub(crate) fn calc_dataset_item(cache: &[u8], i: usize) -> Node {
    let n = cache.len() / HASH_BYTES;
    debug_assert!(n > 0, "cache holds no complete node");
    let index = i as u32;

    let mut mix = read_node(cache, i % n);
    mix[0] ^= index;
    mix = keccak_512_node(&mix);

    for j in 0..DATASET_PARENTS {
        let parent = fnv(index ^ j as u32, mix[j % NODE_WORDS]) as usize % n;
        fnv_mix_hash(&mut mix, &read_node(cache, parent));
    }
    keccak_512_node(&mix)
}

fn seed_hash(header_hash: H256, nonce: u64) -> [u8; 64] {
    let mut seed = [0u8; 40]; // 32 + 8
    seed[..32].copy_from_slice(header_hash.as_bytes());
    seed[32..].copy_from_slice(&nonce.to_le_bytes());
    keccak_512(&seed)
}

fn final_hash(seed: &[u8; 64], mix_hash: &[u8; 32]) -> H256 {
    let mut buf = [0u8; 96]; // 64 + 32
    buf[..64].copy_from_slice(seed);
    buf[64..].copy_from_slice(mix_hash);
    H256(keccak_256(&buf))
}

/// "Main" function of Ethash, calculating the mix digest and result given the
/// header hash and nonce. Returns `(mix_hash, result)`.
///
/// `lookup(i)` yields dataset item `i`; `full_size` must be a non-zero
/// multiple of [`MIX_BYTES`].
pub(crate) fn hashimoto<F>(
    header_hash: H256,
    nonce: u64,
    full_size: usize,
    lookup: F,
) -> (H256, H256)
where
    F: Fn(usize) -> Node,
{
    let rows = full_size / MIX_BYTES;
    debug_assert!(rows > 0, "full size below one mix row");
    let seed = seed_hash(header_hash, nonce);
    let mut seed_words = [0u32; NODE_WORDS];
    LittleEndian::read_u32_into(&seed, &mut seed_words);

    let mut mix = [0u32; MIX_WORDS];
    for (i, w) in mix.iter_mut().enumerate() {
        *w = seed_words[i % NODE_WORDS];
    }

    let mut temp = [0u32; MIX_WORDS];
    for i in 0..ACCESSES {
        let parent = fnv(i as u32 ^ seed_words[0], mix[i % MIX_WORDS]) as usize % rows;
        for k in 0..MIX_NODES {
            let node = lookup(MIX_NODES * parent + k);
            temp[k * NODE_WORDS..(k + 1) * NODE_WORDS].copy_from_slice(&node);
        }
        fnv_mix_hash(&mut mix, &temp);
    }

    let mut cmix = [0u32; MIX_WORDS / 4];
    for (c, lanes) in cmix.iter_mut().zip(mix.chunks_exact(4)) {
        *c = fnv(fnv(fnv(lanes[0], lanes[1]), lanes[2]), lanes[3]);
    }
    let mut mix_hash = [0u8; 32];
    LittleEndian::write_u32_into(&cmix, &mut mix_hash);

    (H256(mix_hash), final_hash(&seed, &mix_hash))
}

/// Recompute the final result from a claimed mix hash, without touching the
/// cache or dataset. A verifier still has to check the mix hash itself.
pub fn quick_hash(header_hash: H256, nonce: u64, mix_hash: H256) -> H256 {
    final_hash(&seed_hash(header_hash, nonce), &mix_hash.0)
}

/// Output of one hashimoto evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReturnValue {
    pub result: H256,
    pub mix_hash: H256,
    pub success: bool,
}

impl ReturnValue {
    fn computed((mix_hash, result): (H256, H256)) -> Self {
        Self {
            result,
            mix_hash,
            success: true,
        }
    }

    fn failed() -> Self {
        Self::default()
    }
}

fn valid_full_size(full_size: usize) -> bool {
    full_size != 0 && full_size % MIX_BYTES == 0
}

/// Ethash used by a light client. Only stores the cache rather than the
/// full dataset.
pub fn hashimoto_light(
    header_hash: H256,
    nonce: u64,
    full_size: usize,
    cache: &[u8],
) -> ReturnValue {
    if cache.is_empty() || cache.len() % HASH_BYTES != 0 || !valid_full_size(full_size) {
        return ReturnValue::failed();
    }
    ReturnValue::computed(hashimoto(header_hash, nonce, full_size, |i| {
        calc_dataset_item(cache, i)
    }))
}

/// Ethash used by a full client. Stores the whole dataset in memory.
pub fn hashimoto_full(header_hash: H256, nonce: u64, dataset: &[u8]) -> ReturnValue {
    if !valid_full_size(dataset.len()) {
        return ReturnValue::failed();
    }
    ReturnValue::computed(hashimoto(header_hash, nonce, dataset.len(), |i| {
        read_node(dataset, i)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_keccak() {
        assert_eq!(
            keccak_256(&[]),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn test_fnv() {
        assert_eq!(fnv(0, 0), 0);
        assert_eq!(fnv(1, 0), FNV_PRIME);
        assert_eq!(fnv(u32::MAX, 1), FNV_PRIME.wrapping_neg() ^ 1);
    }

    #[test]
    fn test_get_seedhash() {
        assert_eq!(get_seedhash(0), H256::zero());
        assert_eq!(
            get_seedhash(1),
            H256(hex!("290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"))
        );
        assert_eq!(
            get_seedhash(2),
            H256(hex!("510e4e770828ddbf7f7b00ab00a9f6adaf81c0dc9cc85f1f8249c256942d61d9"))
        );
        assert_eq!(get_seedhash(5), H256(keccak_256(get_seedhash(4).as_bytes())));
    }

    #[test]
    fn test_make_cache() {
        let mut cache = vec![0u8; 1024];
        make_cache(&mut cache, H256::zero());
        assert_eq!(
            cache[..32],
            hex!("7ce2991c951f7bf4c4c1bb119887ee07871eb5339d7b97b8588e85c742de90e5")
        );
    }

    #[test]
    fn test_hashimoto() {
        let mut cache = vec![0u8; 1024];
        make_cache(&mut cache, H256::zero());
        let mut dataset = vec![0u8; 32 * 1024];
        for (i, out) in dataset.chunks_exact_mut(HASH_BYTES).enumerate() {
            LittleEndian::write_u32_into(&calc_dataset_item(&cache, i), out);
        }

        let header_hash =
            H256(hex!("c9149cc0386e689d789a1c2f3d5d169a61a6218ed30e74414dc736e442ef3d1f"));
        let light = hashimoto_light(header_hash, 0, dataset.len(), &cache);
        let full = hashimoto_full(header_hash, 0, &dataset);

        assert!(light.success);
        assert_eq!(light, full);
        assert_eq!(
            full.mix_hash,
            H256(hex!("e4073cffaef931d37117cefd9afd27ea0f1cad6a981dd2605c4a1ac97c519800"))
        );
        assert_eq!(
            full.result,
            H256(hex!("d3539235ee2e6f8db665c0a72169f55b7f6c605712330b778ec3944f0eb5a557"))
        );
        assert_eq!(quick_hash(header_hash, 0, full.mix_hash), full.result);
    }

    #[test]
    fn quick_hash_rejects_wrong_mix() {
        let header_hash = H256::repeat_byte(0x11);
        let a = quick_hash(header_hash, 7, H256::zero());
        let b = quick_hash(header_hash, 7, H256::repeat_byte(1));
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_inputs_fail_fast() {
        let header_hash = H256::zero();
        assert!(!hashimoto_light(header_hash, 0, 32 * 1024, &[]).success);
        assert!(!hashimoto_light(header_hash, 0, 32 * 1024, &[0u8; 100]).success);
        assert!(!hashimoto_light(header_hash, 0, 0, &[0u8; 128]).success);
        assert!(!hashimoto_light(header_hash, 0, 200, &[0u8; 128]).success);
        assert!(!hashimoto_full(header_hash, 0, &[]).success);

        let failed = hashimoto_full(header_hash, 0, &[0u8; 192]);
        assert!(!failed.success);
        assert_eq!(failed.result, H256::zero());
        assert_eq!(failed.mix_hash, H256::zero());
    }

    #[test]
    fn sizes_below_one_mix_row_fail() {
        let mut cache = vec![0u8; 1024];
        make_cache(&mut cache, H256::zero());
        let header_hash = H256::repeat_byte(0xab);

        for full_size in [HASH_BYTES, MIX_BYTES - 1] {
            assert!(!hashimoto_light(header_hash, 0, full_size, &cache).success);
        }
        assert!(!hashimoto_full(header_hash, 0, &[0u8; HASH_BYTES]).success);
        assert!(!hashimoto_full(header_hash, 0, &[0u8; MIX_BYTES - 1]).success);
        assert!(hashimoto_full(header_hash, 0, &[0u8; MIX_BYTES]).success);
    }
}
