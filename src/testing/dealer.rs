//! Insecure local sources of correlated randomness.
//!
//! Both sources rely on every party being constructed with the same seed and
//! making the identical sequence of calls; the lockstep RNG streams then
//! yield consistent correlated randomness with no dealer communication. Fine
//! for tests, useless for production.

use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::beaver::{ReplayDescriptor, ReplayStatus};
use crate::error::{MpcError, Result};
use crate::ring::{FieldType, RingArray};
use crate::{BeaverSource, PrssSource};

fn random_array(rng: &mut SmallRng, field: FieldType, shape: &[usize]) -> RingArray {
    let numel: usize = shape.iter().product();
    let raw: Vec<u128> = (0..numel).map(|_| rng.gen::<u128>()).collect();
    RingArray::from_vec(field, shape, &raw).expect("length matches shape")
}

/// Pseudorandom secret sharing along the party ring: party `i` shares an RNG
/// stream with each neighbour, so `r0 - r1` summed over all parties
/// telescopes to zero.
pub struct LocalPrss {
    rng_prev: RefCell<SmallRng>,
    rng_next: RefCell<SmallRng>,
    rng_priv: RefCell<SmallRng>,
}

impl LocalPrss {
    pub fn new(num_parties: usize, party_id: usize, seed: u64) -> Self {
        let edge = |i: usize| {
            SmallRng::seed_from_u64(seed ^ 0x9e37_79b9_7f4a_7c15u64.wrapping_mul(i as u64 + 1))
        };
        let prev = (party_id + num_parties - 1) % num_parties;
        LocalPrss {
            rng_prev: RefCell::new(edge(prev)),
            rng_next: RefCell::new(edge(party_id)),
            rng_priv: RefCell::new(SmallRng::seed_from_u64(
                seed.wrapping_add(0xb5ad_4ece_da1c_e2a9).wrapping_add(party_id as u64),
            )),
        }
    }
}

impl PrssSource for LocalPrss {
    fn gen_prss_pair(&self, field: FieldType, shape: &[usize]) -> (RingArray, RingArray) {
        (
            random_array(&mut self.rng_prev.borrow_mut(), field, shape),
            random_array(&mut self.rng_next.borrow_mut(), field, shape),
        )
    }

    fn gen_private(&self, field: FieldType, shape: &[usize]) -> RingArray {
        random_array(&mut self.rng_priv.borrow_mut(), field, shape)
    }
}

/// Trusted-dealer stand-in producing beaver randomness from a shared RNG.
pub struct FakeBeaverSource {
    num_parties: usize,
    party_id: usize,
    rng: RefCell<SmallRng>,
}

impl FakeBeaverSource {
    pub fn new(num_parties: usize, party_id: usize, seed: u64) -> Self {
        assert!(party_id < num_parties);
        FakeBeaverSource {
            num_parties,
            party_id,
            rng: RefCell::new(SmallRng::seed_from_u64(seed ^ 0xbea7_e4a1_51de_5eed)),
        }
    }

    /// Additively split `value`: every party draws the same share vector and
    /// keeps its own component; party 0 absorbs the remainder.
    fn split(&self, rng: &mut SmallRng, value: &RingArray) -> Result<RingArray> {
        let mut share0 = value.clone();
        let mut mine = None;
        for rank in 1..self.num_parties {
            let piece = random_array(rng, value.field(), value.shape());
            share0 = share0.sub(&piece)?;
            if rank == self.party_id {
                mine = Some(piece);
            }
        }
        Ok(match mine {
            Some(piece) => piece,
            None => share0,
        })
    }

    /// Draw a mask, binding or replaying it through the descriptor. Both the
    /// plaintext and the share split come from an RNG derived from the bound
    /// seed, so a replayed descriptor reproduces them exactly.
    fn mask(
        &self,
        rng: &mut SmallRng,
        replay: Option<&mut ReplayDescriptor>,
        field: FieldType,
        shape: &[usize],
    ) -> Result<(RingArray, RingArray)> {
        let seed = match replay {
            None => rng.gen::<u64>(),
            Some(desc) => {
                if desc.status == ReplayStatus::Init {
                    desc.seed = rng.gen::<u64>();
                    desc.status = ReplayStatus::Replayed;
                }
                desc.seed
            }
        };
        let mut mask_rng = SmallRng::seed_from_u64(seed);
        let plain = random_array(&mut mask_rng, field, shape);
        let share = self.split(&mut mask_rng, &plain)?;
        Ok((plain, share))
    }
}

impl BeaverSource for FakeBeaverSource {
    fn mul(
        &self,
        field: FieldType,
        shape: &[usize],
        x_replay: Option<&mut ReplayDescriptor>,
        y_replay: Option<&mut ReplayDescriptor>,
    ) -> Result<(RingArray, RingArray, RingArray)> {
        let mut rng = self.rng.borrow_mut();
        let (a_plain, a_share) = self.mask(&mut rng, x_replay, field, shape)?;
        let (b_plain, b_share) = self.mask(&mut rng, y_replay, field, shape)?;
        let c_share = self.split(&mut rng, &a_plain.mul(&b_plain)?)?;
        Ok((a_share, b_share, c_share))
    }

    fn dot(
        &self,
        field: FieldType,
        m: usize,
        n: usize,
        k: usize,
        x_replay: Option<&mut ReplayDescriptor>,
        y_replay: Option<&mut ReplayDescriptor>,
    ) -> Result<(RingArray, RingArray, RingArray)> {
        let mut rng = self.rng.borrow_mut();
        let (a_plain, a_share) = self.mask(&mut rng, x_replay, field, &[m, k])?;
        let (b_plain, b_share) = self.mask(&mut rng, y_replay, field, &[k, n])?;
        let c_share = self.split(&mut rng, &a_plain.matmul(&b_plain)?)?;
        Ok((a_share, b_share, c_share))
    }

    fn square(
        &self,
        field: FieldType,
        shape: &[usize],
        replay: Option<&mut ReplayDescriptor>,
    ) -> Result<(RingArray, RingArray)> {
        let mut rng = self.rng.borrow_mut();
        let (a_plain, a_share) = self.mask(&mut rng, replay, field, shape)?;
        let b_share = self.split(&mut rng, &a_plain.mul(&a_plain)?)?;
        Ok((a_share, b_share))
    }

    fn trunc_pair(
        &self,
        field: FieldType,
        shape: &[usize],
        bits: usize,
    ) -> Result<(RingArray, RingArray)> {
        let mut rng = self.rng.borrow_mut();
        let r_plain = random_array(&mut rng, field, shape);
        let r_share = self.split(&mut rng, &r_plain)?;
        let rt_share = self.split(&mut rng, &r_plain.arshift(bits))?;
        Ok((r_share, rt_share))
    }

    fn trunc_pr(
        &self,
        field: FieldType,
        shape: &[usize],
        bits: usize,
    ) -> Result<(RingArray, RingArray, RingArray)> {
        let k = field.bits();
        let mut rng = self.rng.borrow_mut();
        let r_plain = random_array(&mut rng, field, shape);
        // rc drops the top bit before shifting, rb is the top bit
        let rc_plain = r_plain.shl(1).shr(1 + bits);
        let rb_plain = r_plain.shr(k - 1);
        let r_share = self.split(&mut rng, &r_plain)?;
        let rc_share = self.split(&mut rng, &rc_plain)?;
        let rb_share = self.split(&mut rng, &rb_plain)?;
        Ok((r_share, rc_share, rb_share))
    }

    fn mul_priv(&self, field: FieldType, shape: &[usize]) -> Result<(RingArray, RingArray)> {
        let mut rng = self.rng.borrow_mut();
        let a0 = random_array(&mut rng, field, shape);
        let a1 = random_array(&mut rng, field, shape);
        let c0 = random_array(&mut rng, field, shape);
        let c1 = a0.mul(&a1)?.sub(&c0)?;
        match self.party_id {
            0 => Ok((a0, c0)),
            1 => Ok((a1, c1)),
            rank => Err(MpcError::Beaver(format!(
                "private multiply pairs exist for ranks 0 and 1 only, got {rank}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 11;

    fn sum(shares: impl IntoIterator<Item = RingArray>) -> RingArray {
        let mut it = shares.into_iter();
        let mut acc = it.next().expect("at least one share");
        for share in it {
            acc = acc.add(&share).unwrap();
        }
        acc
    }

    #[test]
    fn prss_pairs_telescope_to_zero() {
        for world in [1, 2, 3, 5] {
            let sources: Vec<_> = (0..world).map(|r| LocalPrss::new(world, r, SEED)).collect();
            let pairs: Vec<_> = sources
                .iter()
                .map(|s| s.gen_prss_pair(FieldType::FM64, &[4]))
                .collect();
            let masks = pairs.into_iter().map(|(r0, r1)| r0.sub(&r1).unwrap());
            assert_eq!(sum(masks).to_vec(), vec![0; 4]);
        }
    }

    #[test]
    fn triples_are_consistent() {
        let world = 3;
        let sources: Vec<_> = (0..world)
            .map(|r| FakeBeaverSource::new(world, r, SEED))
            .collect();
        let triples: Vec<_> = sources
            .iter()
            .map(|s| s.mul(FieldType::FM64, &[4], None, None).unwrap())
            .collect();
        let a = sum(triples.iter().map(|(a, _, _)| a.clone()));
        let b = sum(triples.iter().map(|(_, b, _)| b.clone()));
        let c = sum(triples.iter().map(|(_, _, c)| c.clone()));
        assert_eq!(a.mul(&b).unwrap(), c);
    }

    #[test]
    fn dot_triples_are_consistent() {
        let world = 2;
        let sources: Vec<_> = (0..world)
            .map(|r| FakeBeaverSource::new(world, r, SEED))
            .collect();
        let triples: Vec<_> = sources
            .iter()
            .map(|s| s.dot(FieldType::FM32, 2, 3, 4, None, None).unwrap())
            .collect();
        let a = sum(triples.iter().map(|(a, _, _)| a.clone()));
        let b = sum(triples.iter().map(|(_, b, _)| b.clone()));
        let c = sum(triples.iter().map(|(_, _, c)| c.clone()));
        assert_eq!(a.shape(), &[2, 4]);
        assert_eq!(b.shape(), &[4, 3]);
        assert_eq!(a.matmul(&b).unwrap(), c);
    }

    #[test]
    fn replay_reproduces_the_mask() {
        let world = 2;
        let field = FieldType::FM64;
        let sources: Vec<_> = (0..world)
            .map(|r| FakeBeaverSource::new(world, r, SEED))
            .collect();
        let mut descs: Vec<_> = (0..world).map(|_| ReplayDescriptor::default()).collect();

        let first: Vec<_> = sources
            .iter()
            .zip(&mut descs)
            .map(|(s, desc)| s.mul(field, &[3], Some(desc), None).unwrap())
            .collect();
        for desc in &descs {
            assert_eq!(desc.status, ReplayStatus::Replayed);
        }

        let second: Vec<_> = sources
            .iter()
            .zip(&mut descs)
            .map(|(s, desc)| s.mul(field, &[3], Some(desc), None).unwrap())
            .collect();

        // same a share, fresh b and c
        for (f, s) in first.iter().zip(&second) {
            assert_eq!(f.0, s.0);
            assert_ne!(f.1, s.1);
        }
        let a = sum(second.iter().map(|(a, _, _)| a.clone()));
        let b = sum(second.iter().map(|(_, b, _)| b.clone()));
        let c = sum(second.iter().map(|(_, _, c)| c.clone()));
        assert_eq!(a.mul(&b).unwrap(), c);
    }

    #[test]
    fn square_replay_matches_mul_mask() {
        let world = 2;
        let field = FieldType::FM64;
        let sources: Vec<_> = (0..world)
            .map(|r| FakeBeaverSource::new(world, r, SEED))
            .collect();
        let mut descs: Vec<_> = (0..world).map(|_| ReplayDescriptor::default()).collect();

        let muls: Vec<_> = sources
            .iter()
            .zip(&mut descs)
            .map(|(s, desc)| s.mul(field, &[2], Some(desc), None).unwrap())
            .collect();
        let squares: Vec<_> = sources
            .iter()
            .zip(&mut descs)
            .map(|(s, desc)| s.square(field, &[2], Some(desc)).unwrap())
            .collect();

        let a = sum(squares.iter().map(|(a, _)| a.clone()));
        let b = sum(squares.iter().map(|(_, b)| b.clone()));
        assert_eq!(a.mul(&a).unwrap(), b);
        for (m, s) in muls.iter().zip(&squares) {
            assert_eq!(m.0, s.0);
        }
    }

    #[test]
    fn trunc_pairs_are_consistent() {
        let world = 3;
        let field = FieldType::FM64;
        let sources: Vec<_> = (0..world)
            .map(|r| FakeBeaverSource::new(world, r, SEED))
            .collect();
        let pairs: Vec<_> = sources
            .iter()
            .map(|s| s.trunc_pair(field, &[8], 5).unwrap())
            .collect();
        let r = sum(pairs.iter().map(|(r, _)| r.clone()));
        let rt = sum(pairs.iter().map(|(_, rt)| rt.clone()));
        assert_eq!(r.arshift(5), rt);
    }

    #[test]
    fn private_mul_pairs_are_consistent() {
        let field = FieldType::FM32;
        let s0 = FakeBeaverSource::new(2, 0, SEED);
        let s1 = FakeBeaverSource::new(2, 1, SEED);
        let (a0, c0) = s0.mul_priv(field, &[4]).unwrap();
        let (a1, c1) = s1.mul_priv(field, &[4]).unwrap();
        assert_eq!(a0.mul(&a1).unwrap(), c0.add(&c1).unwrap());
    }
}
