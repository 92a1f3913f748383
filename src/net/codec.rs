//! Encoding and decoding of wire frames
//!
//! Everything is big-endian. Commands are decoded straight off the
//! socket with async reads; events are serialized into one buffer and
//! written in a single call.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::protocol::*;

/// Protocol violations by a peer
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("String field is not valid UTF-8")]
    BadString(#[from] std::string::FromUtf8Error),
}

async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, ProtocolError> {
    let len = r.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(String::from_utf8(buf)?)
}

/// Read one client command off the stream. An unknown opcode is an
/// error; the caller drops the connection.
pub async fn read_command<R: AsyncRead + Unpin>(r: &mut R) -> Result<Command, ProtocolError> {
    let op = r.read_u8().await?;
    match op {
        OP_MOVE => Ok(Command::Move {
            code: r.read_u8().await?,
        }),
        OP_CREATE_LOBBY => {
            let model = r.read_u8().await?;
            let name = read_string(r).await?;
            let count = r.read_u16().await? as usize;
            let mut maps = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                maps.push(read_string(r).await?);
            }
            Ok(Command::CreateLobby { model, name, maps })
        }
        OP_JOIN_LOBBY => {
            let lobby_id = r.read_u32().await?;
            let model = r.read_u8().await?;
            let name = read_string(r).await?;
            Ok(Command::JoinLobby {
                lobby_id,
                model,
                name,
            })
        }
        OP_START_LOBBY => Ok(Command::StartLobby {
            lobby_id: r.read_u32().await?,
        }),
        OP_UPGRADE => Ok(Command::Upgrade {
            code: r.read_u8().await?,
        }),
        OP_DISCONNECT => Ok(Command::Disconnect),
        other => Err(ProtocolError::UnknownOpcode(other)),
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_result(buf: &mut BytesMut, r: &PlayerResult) {
    put_string(buf, &r.name);
    buf.put_u32(r.race_time_seconds);
    buf.put_u32(r.total_time_seconds);
    buf.put_u8(r.status);
}

/// Serialize one server event into a single frame
pub fn encode_event(event: &Event) -> Bytes {
    let mut buf = BytesMut::new();
    match event {
        Event::AssignedId { client_id } => {
            buf.put_u8(EV_ASSIGNED_ID);
            buf.put_u32(*client_id);
        }
        Event::JoinError => buf.put_u8(EV_JOIN_ERROR),
        Event::JoinAccepted => buf.put_u8(EV_JOIN_ACCEPTED),
        Event::LobbyStarted => buf.put_u8(EV_LOBBY_STARTED),
        Event::PhaseChange => buf.put_u8(EV_PHASE_CHANGE),
        Event::LobbySnapshot(snap) => {
            buf.put_u8(EV_LOBBY_SNAPSHOT);
            buf.put_u32(snap.lobby_id);
            buf.put_u16(snap.players.len() as u16);
            for p in &snap.players {
                put_string(&mut buf, &p.name);
                buf.put_u8(p.model);
            }
        }
        Event::PreGameSnapshot(pre) => {
            buf.put_u8(EV_PRE_GAME_SNAPSHOT);
            buf.put_u32(pre.pole.x0_px);
            buf.put_u32(pre.pole.y0_px);
            buf.put_u32(pre.pole.x1_px);
            buf.put_u32(pre.pole.y1_px);
            buf.put_u8(pre.pole.dir);
            buf.put_u16(pre.remaining_races);
            buf.put_u8(pre.map_id);
            buf.put_u32(pre.total_time_seconds);
            buf.put_u32(pre.move_enabled_seconds);
        }
        Event::GameSnapshot(snap) => {
            buf.put_u8(EV_GAME_SNAPSHOT);
            buf.put_u32(snap.remaining_seconds);
            buf.put_u16(snap.players.len() as u16);
            for p in &snap.players {
                buf.put_u32(p.id);
                buf.put_u8(p.ghost);
                buf.put_u16(p.car_life);
                buf.put_u16(p.model);
                buf.put_u8(p.animation);
                buf.put_u8(p.sound);
                buf.put_u32(p.x_px);
                buf.put_u32(p.y_px);
                buf.put_u8(p.layer);
                buf.put_u32(p.angle_deg);
                buf.put_u16(p.next_checkpoint.len() as u16);
                for c in &p.next_checkpoint {
                    buf.put_u32(c.x_px);
                    buf.put_u32(c.y_px);
                }
                buf.put_u8(p.next_is_goal);
                match &p.second_checkpoint {
                    Some((cells, goal)) => {
                        buf.put_u8(1);
                        buf.put_u16(cells.len() as u16);
                        for c in cells {
                            buf.put_u32(c.x_px);
                            buf.put_u32(c.y_px);
                        }
                        buf.put_u8(*goal);
                    }
                    None => buf.put_u8(0),
                }
            }
            buf.put_u16(snap.npcs.len() as u16);
            for n in &snap.npcs {
                buf.put_u16(n.model);
                buf.put_u8(n.animation);
                buf.put_u32(n.x_px);
                buf.put_u32(n.y_px);
                buf.put_u8(n.layer);
                buf.put_u32(n.angle_deg);
            }
        }
        Event::RaceResults { results } => {
            buf.put_u8(EV_RACE_RESULTS);
            buf.put_u8(0);
            buf.put_u16(results.len() as u16);
            for r in results {
                put_result(&mut buf, r);
            }
        }
        // Final results: the entries below the podium first, then the
        // three podium slots (existence byte each) in 1-2-3 order. The
        // podium count byte tells the client how many places to show.
        Event::RaceResultsLast {
            results,
            podium_count,
        } => {
            buf.put_u8(EV_RACE_RESULTS);
            buf.put_u8(1);

            let non_podium = results.len().saturating_sub(3);
            buf.put_u16(non_podium as u16);
            for r in results.iter().skip(3) {
                put_result(&mut buf, r);
            }

            buf.put_u8((*podium_count).min(3));
            for place in 0..3 {
                match results.get(place) {
                    Some(r) => {
                        buf.put_u8(1);
                        put_result(&mut buf, r);
                    }
                    None => buf.put_u8(0),
                }
            }
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{
        Coord, GameSnapshot, LobbyPlayer, LobbySnapshot, NpcSnapshot, PlayerSnapshot,
    };

    fn frame(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[tokio::test]
    async fn decodes_move_and_upgrade() {
        let bytes = frame(&[&[0x12, 0x02], &[0x33, 0x05]]);
        let mut r = &bytes[..];
        assert_eq!(
            read_command(&mut r).await.unwrap(),
            Command::Move { code: 0x02 }
        );
        assert_eq!(
            read_command(&mut r).await.unwrap(),
            Command::Upgrade { code: 0x05 }
        );
    }

    #[tokio::test]
    async fn decodes_create_lobby_with_map_list() {
        let bytes = frame(&[
            &[0x16, 0x03],
            &[0x00, 0x03],
            b"ana",
            &[0x00, 0x02],
            &[0x00, 0x04],
            b"uno1",
            &[0x00, 0x04],
            b"dos2",
        ]);
        let mut r = &bytes[..];
        assert_eq!(
            read_command(&mut r).await.unwrap(),
            Command::CreateLobby {
                model: 3,
                name: "ana".into(),
                maps: vec!["uno1".into(), "dos2".into()],
            }
        );
    }

    #[tokio::test]
    async fn decodes_join_and_start() {
        let bytes = frame(&[
            &[0x17],
            &1001u32.to_be_bytes(),
            &[0x01],
            &[0x00, 0x03],
            b"bob",
            &[0x22],
            &1001u32.to_be_bytes(),
            &[0x34],
        ]);
        let mut r = &bytes[..];
        assert_eq!(
            read_command(&mut r).await.unwrap(),
            Command::JoinLobby {
                lobby_id: 1001,
                model: 1,
                name: "bob".into(),
            }
        );
        assert_eq!(
            read_command(&mut r).await.unwrap(),
            Command::StartLobby { lobby_id: 1001 }
        );
        assert_eq!(read_command(&mut r).await.unwrap(), Command::Disconnect);
    }

    #[tokio::test]
    async fn unknown_opcode_is_rejected() {
        let bytes = [0x7f];
        let mut r = &bytes[..];
        assert!(matches!(
            read_command(&mut r).await,
            Err(ProtocolError::UnknownOpcode(0x7f))
        ));
    }

    #[test]
    fn encodes_assigned_id() {
        let b = encode_event(&Event::AssignedId { client_id: 1001 });
        assert_eq!(&b[..], &[0x15, 0x00, 0x00, 0x03, 0xe9]);
    }

    #[test]
    fn encodes_single_byte_events() {
        assert_eq!(&encode_event(&Event::JoinError)[..], &[0x20]);
        assert_eq!(&encode_event(&Event::JoinAccepted)[..], &[0x30]);
        assert_eq!(&encode_event(&Event::LobbyStarted)[..], &[0x22]);
        assert_eq!(&encode_event(&Event::PhaseChange)[..], &[0x32]);
    }

    #[test]
    fn encodes_lobby_snapshot() {
        let ev = Event::LobbySnapshot(LobbySnapshot {
            lobby_id: 1001,
            players: vec![LobbyPlayer {
                name: "ana".into(),
                model: 2,
            }],
        });
        let b = encode_event(&ev);
        let expected = frame(&[
            &[0x21],
            &1001u32.to_be_bytes(),
            &[0x00, 0x01],
            &[0x00, 0x03],
            b"ana",
            &[0x02],
        ]);
        assert_eq!(&b[..], &expected[..]);
    }

    #[test]
    fn encodes_game_snapshot_with_optional_second_checkpoint() {
        let player = PlayerSnapshot {
            id: 7,
            ghost: 0,
            car_life: 90,
            model: 2,
            animation: 0,
            sound: 0,
            x_px: 32,
            y_px: 48,
            layer: 0,
            angle_deg: 270,
            next_checkpoint: vec![Coord { x_px: 56, y_px: 24 }],
            next_is_goal: 0,
            second_checkpoint: None,
        };
        let ev = Event::GameSnapshot(GameSnapshot {
            remaining_seconds: 99,
            players: vec![player.clone()],
            npcs: vec![NpcSnapshot {
                model: 0,
                animation: 0,
                x_px: 16,
                y_px: 16,
                layer: 1,
                angle_deg: 90,
            }],
        });
        let b = encode_event(&ev);

        // Header and first fixed fields.
        assert_eq!(b[0], 0x01);
        assert_eq!(&b[1..5], &99u32.to_be_bytes());
        assert_eq!(&b[5..7], &1u16.to_be_bytes());
        // One checkpoint coord, goal 0, no second checkpoint flag.
        let fixed = 7 + 4 + 1 + 2 + 2 + 1 + 1 + 4 + 4 + 1 + 4 + 2;
        assert_eq!(&b[fixed..fixed + 8], frame(&[&56u32.to_be_bytes(), &24u32.to_be_bytes()]).as_slice());
        assert_eq!(b[fixed + 8], 0);
        assert_eq!(b[fixed + 9], 0);
        // NPC block.
        assert_eq!(&b[fixed + 10..fixed + 12], &1u16.to_be_bytes());
        assert_eq!(b.len(), fixed + 12 + 2 + 1 + 4 + 4 + 1 + 4);

        // Present second checkpoint adds its length, coords and flag.
        let mut with_second = player;
        with_second.second_checkpoint = Some((vec![Coord { x_px: 72, y_px: 24 }], 1));
        let ev = Event::GameSnapshot(GameSnapshot {
            remaining_seconds: 99,
            players: vec![with_second],
            npcs: Vec::new(),
        });
        let b2 = encode_event(&ev);
        assert_eq!(b2[fixed + 9], 1);
        assert_eq!(&b2[fixed + 10..fixed + 12], &1u16.to_be_bytes());
        assert_eq!(b2[fixed + 20], 1);
    }

    use bytes::Buf;

    // Mirror of the client-side parser, enough to read every composite
    // frame back into its event.
    fn get_string(buf: &mut Bytes) -> String {
        let len = buf.get_u16() as usize;
        String::from_utf8(buf.copy_to_bytes(len).to_vec()).unwrap()
    }

    fn get_coords(buf: &mut Bytes) -> Vec<Coord> {
        let n = buf.get_u16() as usize;
        (0..n)
            .map(|_| Coord {
                x_px: buf.get_u32(),
                y_px: buf.get_u32(),
            })
            .collect()
    }

    // The wire entry carries no id; clients key results by list order.
    fn get_result(buf: &mut Bytes) -> PlayerResult {
        PlayerResult {
            id: 0,
            name: get_string(buf),
            race_time_seconds: buf.get_u32(),
            total_time_seconds: buf.get_u32(),
            status: buf.get_u8(),
        }
    }

    fn decode_event(mut buf: Bytes) -> Event {
        match buf.get_u8() {
            EV_GAME_SNAPSHOT => {
                let remaining_seconds = buf.get_u32();
                let n = buf.get_u16() as usize;
                let players = (0..n)
                    .map(|_| {
                        let id = buf.get_u32();
                        let ghost = buf.get_u8();
                        let car_life = buf.get_u16();
                        let model = buf.get_u16();
                        let animation = buf.get_u8();
                        let sound = buf.get_u8();
                        let x_px = buf.get_u32();
                        let y_px = buf.get_u32();
                        let layer = buf.get_u8();
                        let angle_deg = buf.get_u32();
                        let next_checkpoint = get_coords(&mut buf);
                        let next_is_goal = buf.get_u8();
                        let second_checkpoint = match buf.get_u8() {
                            0 => None,
                            _ => {
                                let coords = get_coords(&mut buf);
                                Some((coords, buf.get_u8()))
                            }
                        };
                        PlayerSnapshot {
                            id,
                            ghost,
                            car_life,
                            model,
                            animation,
                            sound,
                            x_px,
                            y_px,
                            layer,
                            angle_deg,
                            next_checkpoint,
                            next_is_goal,
                            second_checkpoint,
                        }
                    })
                    .collect();
                let n = buf.get_u16() as usize;
                let npcs = (0..n)
                    .map(|_| NpcSnapshot {
                        model: buf.get_u16(),
                        animation: buf.get_u8(),
                        x_px: buf.get_u32(),
                        y_px: buf.get_u32(),
                        layer: buf.get_u8(),
                        angle_deg: buf.get_u32(),
                    })
                    .collect();
                Event::GameSnapshot(GameSnapshot {
                    remaining_seconds,
                    players,
                    npcs,
                })
            }
            EV_LOBBY_SNAPSHOT => {
                let lobby_id = buf.get_u32();
                let n = buf.get_u16() as usize;
                let players = (0..n)
                    .map(|_| LobbyPlayer {
                        name: get_string(&mut buf),
                        model: buf.get_u8(),
                    })
                    .collect();
                Event::LobbySnapshot(LobbySnapshot { lobby_id, players })
            }
            EV_PRE_GAME_SNAPSHOT => Event::PreGameSnapshot(PreGameSnapshot {
                pole: PoleBox {
                    x0_px: buf.get_u32(),
                    y0_px: buf.get_u32(),
                    x1_px: buf.get_u32(),
                    y1_px: buf.get_u32(),
                    dir: buf.get_u8(),
                },
                remaining_races: buf.get_u16(),
                map_id: buf.get_u8(),
                total_time_seconds: buf.get_u32(),
                move_enabled_seconds: buf.get_u32(),
            }),
            EV_RACE_RESULTS => match buf.get_u8() {
                0 => {
                    let n = buf.get_u16() as usize;
                    let results = (0..n).map(|_| get_result(&mut buf)).collect();
                    Event::RaceResults { results }
                }
                _ => {
                    let n = buf.get_u16() as usize;
                    let below: Vec<PlayerResult> =
                        (0..n).map(|_| get_result(&mut buf)).collect();
                    let podium_count = buf.get_u8();
                    let mut results = Vec::new();
                    for _ in 0..3 {
                        if buf.get_u8() == 1 {
                            results.push(get_result(&mut buf));
                        }
                    }
                    results.extend(below);
                    Event::RaceResultsLast {
                        results,
                        podium_count,
                    }
                }
            },
            other => panic!("unexpected opcode {other:#04x}"),
        }
    }

    fn sample_player(id: u32) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            ghost: 0,
            car_life: 80,
            model: 3,
            animation: 2,
            sound: 1,
            x_px: 160,
            y_px: 320,
            layer: 1,
            angle_deg: 45,
            next_checkpoint: vec![Coord { x_px: 48, y_px: 16 }, Coord { x_px: 48, y_px: 32 }],
            next_is_goal: 0,
            second_checkpoint: None,
        }
    }

    #[test]
    fn game_snapshot_round_trips() {
        let mut with_second = sample_player(8);
        with_second.second_checkpoint = Some((vec![Coord { x_px: 80, y_px: 16 }], 1));
        let ev = Event::GameSnapshot(GameSnapshot {
            remaining_seconds: 587,
            players: vec![sample_player(7), with_second],
            npcs: vec![NpcSnapshot {
                model: 0,
                animation: 4,
                x_px: 96,
                y_px: 96,
                layer: 0,
                angle_deg: 180,
            }],
        });
        assert_eq!(decode_event(encode_event(&ev)), ev);
    }

    #[test]
    fn lobby_snapshot_round_trips() {
        let ev = Event::LobbySnapshot(LobbySnapshot {
            lobby_id: 1002,
            players: vec![
                LobbyPlayer {
                    name: "ana".into(),
                    model: 2,
                },
                LobbyPlayer {
                    name: "bob".into(),
                    model: 5,
                },
            ],
        });
        assert_eq!(decode_event(encode_event(&ev)), ev);
    }

    #[test]
    fn pre_game_snapshot_round_trips() {
        let ev = Event::PreGameSnapshot(PreGameSnapshot {
            pole: PoleBox {
                x0_px: 240,
                y0_px: 160,
                x1_px: 256,
                y1_px: 176,
                dir: 0,
            },
            remaining_races: 3,
            map_id: 1,
            total_time_seconds: 610,
            move_enabled_seconds: 600,
        });
        assert_eq!(decode_event(encode_event(&ev)), ev);
    }

    #[test]
    fn race_results_round_trip() {
        let mk = |name: &str, race: u32, total: u32, status: u8| PlayerResult {
            id: 0,
            name: name.into(),
            race_time_seconds: race,
            total_time_seconds: total,
            status,
        };
        let results = vec![
            mk("ana", 40, 90, 0),
            mk("bob", 55, 120, 0),
            mk("eva", 600, 900, 1),
            mk("leo", 600, 950, 1),
        ];

        let ev = Event::RaceResults {
            results: results.clone(),
        };
        assert_eq!(decode_event(encode_event(&ev)), ev);

        let ev = Event::RaceResultsLast {
            results,
            podium_count: 2,
        };
        assert_eq!(decode_event(encode_event(&ev)), ev);
    }

    #[test]
    fn encodes_final_results_podium_layout() {
        let mk = |id: u32, name: &str| PlayerResult {
            id,
            name: name.into(),
            race_time_seconds: 10 * id,
            total_time_seconds: 20 * id,
            status: 0,
        };
        let results = vec![mk(1, "a"), mk(2, "b")];
        let b = encode_event(&Event::RaceResultsLast {
            results,
            podium_count: 2,
        });

        assert_eq!(b[0], 0x24);
        assert_eq!(b[1], 1);
        // Two entries, nobody below the podium.
        assert_eq!(&b[2..4], &0u16.to_be_bytes());
        assert_eq!(b[4], 2);
        // First place exists.
        assert_eq!(b[5], 1);
        // Third place slot is an absence byte.
        assert_eq!(b[b.len() - 1], 0);
    }
}
