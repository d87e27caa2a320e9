// tests/property/frame_boundary_test.rs

//! Property-based tests for frame boundary integrity
//! K complete frames followed by an incomplete prefix, delivered in arbitrary
//! chunks, must yield exactly K frames in order and leave only the prefix.

use crate::test_helpers::{TestContext, encode};
use modbus_tcp_server::connection::{FrameBuffer, SessionOutcome};
use modbus_tcp_server::core::protocol::MbapFrame;
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn arb_frame() -> impl Strategy<Value = MbapFrame> {
    (
        any::<u16>(),
        any::<u8>(),
        prop::collection::vec(any::<u8>(), 1..=253),
    )
        .prop_map(|(tid, unit, pdu)| MbapFrame::new(tid, unit, pdu))
}

/// Cuts `bytes` at the given (unsorted, possibly repeated) offsets.
fn chunk(bytes: &[u8], mut cuts: Vec<usize>) -> Vec<&[u8]> {
    cuts.iter_mut().for_each(|c| *c %= bytes.len() + 1);
    cuts.push(0);
    cuts.push(bytes.len());
    cuts.sort_unstable();
    cuts.dedup();
    cuts.windows(2).map(|w| &bytes[w[0]..w[1]]).collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_k_frames_and_prefix_in_any_chunking(
        frames in prop::collection::vec(arb_frame(), 0..=8),
        partial in arb_frame(),
        prefix_seed in any::<usize>(),
        cuts in prop::collection::vec(any::<usize>(), 0..=16),
    ) {
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend(frame.encode_to_vec().unwrap());
        }
        let partial_bytes = partial.encode_to_vec().unwrap();
        let prefix = &partial_bytes[..prefix_seed % partial_bytes.len()];
        wire.extend_from_slice(prefix);

        let mut buffer = FrameBuffer::new();
        let mut extracted = Vec::new();
        for piece in chunk(&wire, cuts) {
            buffer.append(piece);
            while let Some(frame) = buffer.try_extract_frame().unwrap() {
                extracted.push(frame);
            }
            // Draining again without new bytes changes nothing.
            let before = buffer.pending().to_vec();
            prop_assert!(buffer.try_extract_frame().unwrap().is_none());
            prop_assert_eq!(buffer.pending(), &before[..]);
        }

        prop_assert_eq!(extracted, frames);
        prop_assert_eq!(buffer.pending(), prefix);
    }

    #[test]
    fn test_session_answers_every_request_once_under_any_chunking(
        addresses in prop::collection::vec(0u16..64, 1..=6),
        cuts in prop::collection::vec(any::<usize>(), 0..=12),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new();
            let mut wire = Vec::new();
            let mut expected = Vec::new();
            for (tid, address) in addresses.iter().enumerate() {
                let value = address.wrapping_mul(3);
                ctx.registers.set_holding_register(*address, value).unwrap();
                let mut pdu = vec![0x03];
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&1u16.to_be_bytes());
                wire.extend(encode(tid as u16, 1, pdu));
                let mut response = vec![0x03, 0x02];
                response.extend_from_slice(&value.to_be_bytes());
                expected.extend(encode(tid as u16, 1, response));
            }

            let (mut client, server) = tokio::io::duplex(4096);
            let session = tokio::spawn(ctx.handler(server, 1).run());
            for piece in chunk(&wire, cuts) {
                client.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }

            let mut received = vec![0u8; expected.len()];
            client.read_exact(&mut received).await.unwrap();
            drop(client);

            assert_eq!(received, expected);
            assert_eq!(session.await.unwrap(), SessionOutcome::PeerClosed);
            assert_eq!(ctx.frames_processed(), addresses.len() as u64);
        });
    }
}
