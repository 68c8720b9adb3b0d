use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use proptest::prelude::*;

use super::*;

fn ctx() -> PolicyContext {
    PolicyContext {
        min_reconnect_time: 0,
        max_peerlist_size: 100,
        ..Default::default()
    }
}

fn addr(i: u32, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i)), port)
}

fn attached(id: u64, local: SocketAddr, remote: SocketAddr, outgoing: bool) -> AttachedConnection {
    AttachedConnection {
        id: ConnectionId(id),
        local,
        remote,
        outgoing,
    }
}

fn local() -> SocketAddr {
    "192.168.1.1:6881".parse().unwrap()
}

#[test]
fn test_add_peer_first_time_seen() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();

    let handle = list
        .add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state)
        .unwrap();
    assert!(state.first_time_seen);
    assert_eq!(list.len(), 1);
    assert_eq!(list.num_connect_candidates(), 1);

    let again = list
        .add_peer(addr(1, 6882), PeerSource::DHT, false, &ctx(), &mut state)
        .unwrap();
    assert!(!state.first_time_seen);
    assert_eq!(again, handle);

    let peer = list.get(handle).unwrap();
    assert_eq!(peer.port(), 6882);
    assert!(peer.source().contains(PeerSource::TRACKER));
    assert!(peer.source().contains(PeerSource::DHT));
    list.check_invariant();
}

#[test]
fn test_add_peer_rejects_unusable_addresses() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();

    assert!(list.add_peer("0.0.0.0:6881".parse().unwrap(), PeerSource::TRACKER, false, &ctx(), &mut state).is_none());
    assert!(list.add_peer(addr(1, 0), PeerSource::TRACKER, false, &ctx(), &mut state).is_none());
    assert!(list.add_peer("[fe80::1]:6881".parse().unwrap(), PeerSource::TRACKER, false, &ctx(), &mut state).is_none());

    let privileged = PolicyContext {
        no_connect_privileged_ports: true,
        ..ctx()
    };
    assert!(list.add_peer(addr(2, 80), PeerSource::DHT, false, &privileged, &mut state).is_none());
    assert!(list.add_peer(addr(2, 80), PeerSource::TRACKER, false, &privileged, &mut state).is_some());
    assert_eq!(list.len(), 1);
}

#[test]
fn test_multiple_connections_per_ip_keys_on_endpoint() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let multi = PolicyContext {
        allow_multiple_connections_per_ip: true,
        ..ctx()
    };

    let a = list.add_peer(addr(1, 1000), PeerSource::TRACKER, false, &multi, &mut state).unwrap();
    let b = list.add_peer(addr(1, 2000), PeerSource::TRACKER, false, &multi, &mut state).unwrap();
    assert_ne!(a, b);
    assert_eq!(list.len(), 2);
    list.check_invariant();
}

#[test]
fn test_tracker_source_forgives_one_failure() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list.add_peer(addr(1, 6881), PeerSource::DHT, false, &ctx(), &mut state).unwrap();

    list.set_failcount(handle, 3);
    assert_eq!(list.num_connect_candidates(), 0);

    list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state);
    assert_eq!(list.get(handle).unwrap().failcount(), 2);
    assert_eq!(list.num_connect_candidates(), 1);
    list.check_invariant();
}

#[test]
fn test_seed_candidacy_follows_finished_state() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    list.add_peer(addr(1, 6881), PeerSource::TRACKER, true, &ctx(), &mut state);
    list.add_peer(addr(2, 6881), PeerSource::TRACKER, false, &ctx(), &mut state);
    list.sync_context(&ctx());
    assert_eq!(list.num_seeds(), 1);
    assert_eq!(list.num_connect_candidates(), 2);

    let finished = PolicyContext {
        is_finished: true,
        ..ctx()
    };
    list.sync_context(&finished);
    assert_eq!(list.num_connect_candidates(), 1);
    list.check_invariant();
}

#[test]
fn test_web_seed_is_neither_candidate_nor_seed() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list
        .add_peer(addr(1, 80), PeerSource::TRACKER, true, &ctx(), &mut state)
        .unwrap();
    assert_eq!(list.num_seeds(), 1);

    list.set_web_seed(handle, true);
    assert!(list.get(handle).unwrap().is_web_seed());
    assert_eq!(list.num_connect_candidates(), 0);
    assert_eq!(list.num_seeds(), 0);
    list.check_invariant();

    list.set_web_seed(handle, false);
    assert_eq!(list.num_connect_candidates(), 1);
    assert_eq!(list.num_seeds(), 1);
    list.check_invariant();
}

#[test]
fn test_erase_missing_peer_is_noop() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();

    list.erase_peer(handle, &mut state);
    assert_eq!(state.erased, vec![handle]);
    assert!(list.get(handle).is_none());

    list.erase_peer(handle, &mut state);
    assert_eq!(state.erased.len(), 1);
    assert_eq!(list.num_connect_candidates(), 0);
    list.check_invariant();
}

#[test]
fn test_stale_handle_does_not_resolve_after_reuse() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let old = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    list.erase_peer(old, &mut state);

    let new = list.add_peer(addr(2, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    assert_eq!(new.index, old.index);
    assert!(list.get(old).is_none());
    assert!(list.get(new).is_some());
    assert!(!list.ban_peer(old));
}

#[test]
fn test_full_list_evicts_failed_peer() {
    let small = PolicyContext {
        max_peerlist_size: 20,
        ..ctx()
    };
    let mut list = PeerList::new(Some(7));
    let mut state = PeerListState::default();
    let mut handles = Vec::new();
    for i in 0..20 {
        handles.push(list.add_peer(addr(i, 6881), PeerSource::TRACKER, false, &small, &mut state).unwrap());
    }
    list.set_failcount(handles[5], 3);

    let added = list.add_peer(addr(100, 6881), PeerSource::TRACKER, false, &small, &mut state);
    assert!(added.is_some());
    assert_eq!(state.erased, vec![handles[5]]);
    assert_eq!(list.len(), 20);
    list.check_invariant();
}

#[test]
fn test_full_list_rejects_resume_peer_and_unevictable_peer() {
    let small = PolicyContext {
        max_peerlist_size: 10,
        ..ctx()
    };
    let mut list = PeerList::new(Some(7));
    let mut state = PeerListState::default();
    for i in 0..10 {
        list.add_peer(addr(i, 6881), PeerSource::TRACKER, false, &small, &mut state);
    }

    assert!(list.add_peer(addr(50, 6881), PeerSource::RESUME_DATA, false, &small, &mut state).is_none());
    // Every peer is a healthy candidate, nothing to evict
    assert!(list.add_peer(addr(51, 6881), PeerSource::TRACKER, false, &small, &mut state).is_none());
    assert!(state.erased.is_empty());
}

#[test]
fn test_resume_only_peers_erased_immediately() {
    let small = PolicyContext {
        max_peerlist_size: 10,
        max_failcount: 3,
        ..ctx()
    };
    let mut list = PeerList::new(Some(3));
    let mut state = PeerListState::default();
    let mut resume = Vec::new();
    for i in 0..4 {
        let handle = list.add_peer(addr(i, 6881), PeerSource::RESUME_DATA, false, &small, &mut state).unwrap();
        list.set_connectable(handle, false);
        resume.push(handle);
    }
    for i in 4..10 {
        list.add_peer(addr(i, 6881), PeerSource::TRACKER, false, &small, &mut state);
    }

    list.erase_peers(&small, false, &mut state);
    // The watermark is 9, so scanning stops once below it
    assert!(!state.erased.is_empty());
    assert!(state.erased.iter().all(|h| resume.contains(h)));
    list.check_invariant();
}

#[test]
fn test_scan_erasing_resume_peers_still_finds_every_candidate() {
    let small = PolicyContext {
        max_peerlist_size: 4,
        ..ctx()
    };
    for start in 0..4 {
        let mut list = PeerList::new(Some(5));
        let mut state = PeerListState::default();
        let mut wanted = Vec::new();
        for i in 1..=4 {
            if i % 2 == 1 {
                wanted.push(list.add_peer(addr(i, 6881), PeerSource::TRACKER, false, &small, &mut state).unwrap());
            } else {
                let handle = list.add_peer(addr(i, 6881), PeerSource::RESUME_DATA, false, &small, &mut state).unwrap();
                list.set_connectable(handle, false);
            }
        }
        // Includes a cursor on the last slot, which wraps once it is erased
        list.round_robin = start;

        let mut found: Vec<PeerHandle> = (0..2)
            .filter_map(|_| list.connect_one_peer(&small, &mut state))
            .collect();
        found.sort_by_key(|h| h.index);
        wanted.sort_by_key(|h| h.index);
        assert_eq!(found, wanted, "cursor starting at {start}");
        assert_eq!(list.len(), 2);
        list.check_invariant();
    }
}

#[test]
fn test_force_erase_takes_unconnected_peer() {
    let small = PolicyContext {
        max_peerlist_size: 4,
        ..ctx()
    };
    let mut list = PeerList::new(Some(3));
    let mut state = PeerListState::default();
    for i in 0..4 {
        list.add_peer(addr(i, 6881), PeerSource::TRACKER, false, &small, &mut state);
    }

    let incoming = attached(1, local(), addr(99, 50000), false);
    let handle = list.new_connection(incoming, false, &small, &mut state).unwrap();
    assert_eq!(state.erased.len(), 1);
    assert_eq!(list.len(), 4);
    assert!(list.get(handle).unwrap().source().is_only(PeerSource::INCOMING));
    assert!(!list.get(handle).unwrap().is_connectable());
    list.check_invariant();
}

#[test]
fn test_connect_one_peer_prefers_best_candidate() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let failed = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    list.set_failcount(failed, 1);
    let dht = list.add_peer(addr(2, 6881), PeerSource::DHT, false, &ctx(), &mut state).unwrap();
    let tracker = list.add_peer(addr(3, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();

    assert_eq!(list.connect_one_peer(&ctx(), &mut state), Some(tracker));
    assert_eq!(list.connect_one_peer(&ctx(), &mut state), Some(dht));
    assert_eq!(list.connect_one_peer(&ctx(), &mut state), Some(failed));
}

#[test]
fn test_connect_one_peer_honors_reconnect_delay() {
    let delayed = PolicyContext {
        min_reconnect_time: 60,
        session_time: 100,
        ..ctx()
    };
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &delayed, &mut state).unwrap();

    let conn = attached(1, local(), addr(1, 6881), true);
    assert!(list.set_connection(handle, conn, 90));
    assert_eq!(list.num_connect_candidates(), 0);
    list.connection_closed(handle, conn.id, true, false, &delayed, &mut state);
    assert_eq!(list.get(handle).unwrap().failcount(), 1);
    assert_eq!(list.num_connect_candidates(), 1);

    // Failed once: must wait 2 * 60 seconds
    assert_eq!(list.connect_one_peer(&delayed, &mut state), None);

    let later = PolicyContext {
        session_time: 221,
        ..delayed
    };
    assert_eq!(list.connect_one_peer(&later, &mut state), Some(handle));
}

#[test]
fn test_refused_connect_waits_like_a_closed_connection() {
    let delayed = PolicyContext {
        min_reconnect_time: 60,
        session_time: 10,
        ..ctx()
    };
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list.add_peer(addr(1, 6881), PeerSource::DHT, false, &delayed, &mut state).unwrap();
    assert_eq!(list.connect_one_peer(&delayed, &mut state), Some(handle));

    list.connect_failed(handle, 10);
    let peer = list.get(handle).unwrap();
    assert_eq!(peer.failcount(), 1);
    assert!(!peer.is_connected());
    assert_eq!(list.num_connect_candidates(), 1);
    assert_eq!(list.connect_one_peer(&delayed, &mut state), None);

    let later = PolicyContext {
        session_time: 130,
        ..delayed
    };
    assert_eq!(list.connect_one_peer(&later, &mut state), Some(handle));
    list.check_invariant();
}

#[test]
fn test_incoming_connection_to_banned_peer_rejected() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    assert!(list.ban_peer(handle));
    assert_eq!(list.num_connect_candidates(), 0);

    let incoming = attached(1, local(), addr(1, 50000), false);
    assert_eq!(
        list.new_connection(incoming, false, &ctx(), &mut state),
        Err(DisconnectReason::PeerBanned)
    );
}

#[test]
fn test_duplicate_incoming_connection_rejected() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();

    let first = attached(1, local(), addr(1, 50000), false);
    let handle = list.new_connection(first, false, &ctx(), &mut state).unwrap();

    let second = attached(2, local(), addr(1, 50001), false);
    assert_eq!(
        list.new_connection(second, false, &ctx(), &mut state),
        Err(DisconnectReason::DuplicatePeer)
    );
    assert_eq!(list.get(handle).unwrap().connection().unwrap().id, ConnectionId(1));
}

#[test]
fn test_replaced_duplicate_closes_without_detaching() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    // Our listen port is above theirs, so their outgoing connection wins
    let our_listen: SocketAddr = "192.168.1.1:9000".parse().unwrap();
    let handle = list.add_peer(addr(1, 7000), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    let outgoing = attached(1, "192.168.1.1:50000".parse().unwrap(), addr(1, 7000), true);
    list.set_connection(handle, outgoing, 0);

    let incoming = attached(2, our_listen, addr(1, 50001), false);
    let kept = list.new_connection(incoming, false, &ctx(), &mut state).unwrap();
    assert_eq!(kept, handle);
    assert_eq!(state.disconnect, vec![(ConnectionId(1), DisconnectReason::DuplicatePeer)]);

    // The old connection closing late leaves the new one attached
    list.connection_closed(handle, ConnectionId(1), true, false, &ctx(), &mut state);
    let peer = list.get(handle).unwrap();
    assert_eq!(peer.connection().unwrap().id, ConnectionId(2));
    assert_eq!(peer.failcount(), 0);
    list.check_invariant();
}

#[test]
fn test_unconnectable_incoming_erased_on_close_with_multiple_per_ip() {
    let multi = PolicyContext {
        allow_multiple_connections_per_ip: true,
        ..ctx()
    };
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let incoming = attached(1, local(), addr(1, 50000), false);
    let handle = list.new_connection(incoming, false, &multi, &mut state).unwrap();

    list.connection_closed(handle, incoming.id, false, false, &multi, &mut state);
    assert!(list.get(handle).is_none());
    assert_eq!(state.erased, vec![handle]);
}

#[test]
fn test_update_peer_port_merges_duplicate() {
    let multi = PolicyContext {
        allow_multiple_connections_per_ip: true,
        ..ctx()
    };
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();

    let known = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &multi, &mut state).unwrap();
    let known_conn = attached(1, "192.168.1.1:50000".parse().unwrap(), addr(1, 6881), true);
    list.set_connection(known, known_conn, 0);

    let incoming = attached(2, local(), addr(1, 50001), false);
    let handle = list.new_connection(incoming, false, &multi, &mut state).unwrap();
    assert_ne!(handle, known);

    assert!(!list.update_peer_port(handle, 6881, PeerSource::INCOMING, &multi, &mut state));
    assert_eq!(state.disconnect, vec![(ConnectionId(2), DisconnectReason::DuplicatePeer)]);
    assert!(state.erased.contains(&handle));
    assert!(list.get(known).unwrap().source().contains(PeerSource::INCOMING));
    list.check_invariant();
}

#[test]
fn test_update_peer_port_makes_connectable() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let incoming = attached(1, local(), addr(1, 50000), false);
    let handle = list.new_connection(incoming, false, &ctx(), &mut state).unwrap();

    assert!(list.update_peer_port(handle, 6881, PeerSource::INCOMING, &ctx(), &mut state));
    let peer = list.get(handle).unwrap();
    assert!(peer.is_connectable());
    assert_eq!(peer.port(), 6881);
    assert_eq!(list.find(&PeerEndpoint::Ip(addr(1, 6881))), Some(handle));

    list.connection_closed(handle, incoming.id, false, false, &ctx(), &mut state);
    assert_eq!(list.num_connect_candidates(), 1);
    list.check_invariant();
}

#[test]
fn test_ip_filter_disconnects_and_erases() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let connected = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    list.set_connection(connected, attached(9, local(), addr(1, 6881), true), 0);
    list.add_peer(addr(2, 6881), PeerSource::TRACKER, false, &ctx(), &mut state);
    list.add_peer("8.8.8.8:6881".parse().unwrap(), PeerSource::TRACKER, false, &ctx(), &mut state);

    let blocked = list.apply_ip_filter(|ip| matches!(ip, IpAddr::V4(v4) if v4.octets()[0] == 10), &mut state);
    assert_eq!(blocked.len(), 2);
    assert_eq!(list.len(), 1);
    assert_eq!(state.disconnect, vec![(ConnectionId(9), DisconnectReason::BannedByIpFilter)]);
    list.check_invariant();
}

#[test]
fn test_port_filter() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    list.add_peer(addr(1, 80), PeerSource::TRACKER, false, &ctx(), &mut state);
    list.add_peer(addr(2, 6881), PeerSource::TRACKER, false, &ctx(), &mut state);

    list.apply_port_filter(|port| port < 1024, &mut state);
    assert_eq!(list.len(), 1);
    assert_eq!(state.erased.len(), 1);
}

#[test]
fn test_i2p_peers() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    let handle = list.add_i2p_peer("abcdef", PeerSource::TRACKER, &ctx(), &mut state).unwrap();
    assert!(state.first_time_seen);
    assert_eq!(list.add_i2p_peer("abcdef", PeerSource::PEX, &ctx(), &mut state), Some(handle));
    assert!(list.add_i2p_peer("", PeerSource::PEX, &ctx(), &mut state).is_none());
    assert_eq!(list.len(), 1);
    list.check_invariant();
}

#[test]
fn test_candidate_transition_reported_once() {
    let mut list = PeerList::new(Some(1));
    let mut state = PeerListState::default();
    assert_eq!(list.take_candidates_transition(), None);

    let handle = list.add_peer(addr(1, 6881), PeerSource::TRACKER, false, &ctx(), &mut state).unwrap();
    assert_eq!(list.take_candidates_transition(), Some(true));
    assert_eq!(list.take_candidates_transition(), None);

    list.ban_peer(handle);
    assert_eq!(list.take_candidates_transition(), Some(false));
}

#[derive(Debug, Clone)]
enum Op {
    Add(u8, u16, bool),
    Ban(u8),
    Connect(u8),
    Close(u8, bool),
    Fail(u8),
    Seed(u8, bool),
    Finished(bool),
    Erase(u8),
    Incoming(u8),
    Evict,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..40, 1u16..4, any::<bool>()).prop_map(|(i, p, s)| Op::Add(i, p, s)),
        (0u8..40).prop_map(Op::Ban),
        (0u8..40).prop_map(Op::Connect),
        (0u8..40, any::<bool>()).prop_map(|(i, f)| Op::Close(i, f)),
        (0u8..40).prop_map(Op::Fail),
        (0u8..40, any::<bool>()).prop_map(|(i, s)| Op::Seed(i, s)),
        any::<bool>().prop_map(Op::Finished),
        (0u8..40).prop_map(Op::Erase),
        (0u8..40).prop_map(Op::Incoming),
        Just(Op::Evict),
    ]
}

proptest! {
    #[test]
    fn test_candidate_count_matches_predicate(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut list = PeerList::new(Some(11));
        let mut context = PolicyContext {
            max_peerlist_size: 30,
            ..ctx()
        };
        let mut state = PeerListState::default();
        let mut next_conn = 0u64;

        let pick = |list: &PeerList, i: u8| -> Option<PeerHandle> {
            let handles: Vec<PeerHandle> = list.iter().map(|(h, _)| h).collect();
            (!handles.is_empty()).then(|| handles[i as usize % handles.len()])
        };

        for op in ops {
            match op {
                Op::Add(i, port, seed) => {
                    list.add_peer(addr(u32::from(i), 6880 + port), PeerSource::TRACKER, seed, &context, &mut state);
                }
                Op::Ban(i) => {
                    if let Some(h) = pick(&list, i) { list.ban_peer(h); }
                }
                Op::Connect(i) => {
                    if let Some(h) = pick(&list, i) {
                        let peer = list.get(h).unwrap();
                        if peer.connection().is_none() {
                            if let Some(remote) = peer.endpoint().socket_addr() {
                                next_conn += 1;
                                list.set_connection(h, attached(next_conn, local(), remote, true), context.session_time);
                            }
                        }
                    }
                }
                Op::Close(i, failed) => {
                    if let Some(h) = pick(&list, i) {
                        if let Some(conn) = list.get(h).unwrap().connection().copied() {
                            list.connection_closed(h, conn.id, failed, false, &context, &mut state);
                        }
                    }
                }
                Op::Fail(i) => {
                    if let Some(h) = pick(&list, i) { list.inc_failcount(h); }
                }
                Op::Seed(i, seed) => {
                    if let Some(h) = pick(&list, i) { list.set_seed(h, seed); }
                }
                Op::Finished(finished) => {
                    context.is_finished = finished;
                    list.sync_context(&context);
                }
                Op::Erase(i) => {
                    if let Some(h) = pick(&list, i) { list.erase_peer(h, &mut state); }
                }
                Op::Incoming(i) => {
                    next_conn += 1;
                    let _ = list.new_connection(attached(next_conn, local(), addr(u32::from(i), 40000), false), false, &context, &mut state);
                }
                Op::Evict => {
                    list.erase_peers(&context, true, &mut state);
                }
            }

            list.check_invariant();
            for (_, peer) in list.iter() {
                let expected = peer.connection().is_none()
                    && !peer.is_banned()
                    && peer.is_connectable()
                    && !peer.is_web_seed()
                    && peer.failcount() < context.max_failcount
                    && !(peer.is_seed() && context.is_finished);
                prop_assert_eq!(list.is_connect_candidate(peer), expected);
            }
            for erased in &state.erased {
                prop_assert!(list.get(*erased).is_none());
            }
        }
    }
}
