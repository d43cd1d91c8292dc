//! Generic key commands: liveness, deletion, enumeration, expiry control.

use crate::commands::parse_int;
use crate::commands::registry::CommandRegistry;
use crate::db::{epoch_seconds, Database};
use crate::glob::glob_match;
use crate::protocol::Reply;
use bytes::Bytes;

pub fn register(registry: &mut CommandRegistry) {
    registry.register("ping", ping);
    registry.register("echo", echo);
    registry.register("del", del);
    registry.register("exists", exists);
    registry.register("keys", keys);
    registry.register("expire", expire);
    registry.register("persist", persist);
    registry.register("ttl", ttl);
    registry.register("rename", rename);
}

fn integer_error() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

/// PING [message]
fn ping(_db: &Database, argv: &[Bytes]) -> Reply {
    match argv.len() {
        1 => Reply::pong(),
        2 => Reply::Bulk(argv[1].clone()),
        _ => Reply::wrong_arity("ping"),
    }
}

/// ECHO message
fn echo(_db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("echo");
    }
    Reply::Bulk(argv[1].clone())
}

/// DEL key [key ...]
///
/// Every argument is visited; the reply counts the keys actually removed.
/// A key that turns out to be expired on the way is evicted by the check
/// and not counted.
fn del(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() < 2 {
        return Reply::wrong_arity("del");
    }

    let mut removed = 0;
    for key in &argv[1..] {
        if !db.check_ttl(key) {
            continue;
        }
        let _guard = db.locks().write(key);
        if db.delete_key(key) {
            removed += 1;
        }
    }
    Reply::integer(removed)
}

/// EXISTS key [key ...]
///
/// Counts keys that currently exist; duplicates in argv are counted every
/// time they appear.
fn exists(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() < 2 {
        return Reply::wrong_arity("exists");
    }

    let mut present = 0;
    for key in &argv[1..] {
        if !db.check_ttl(key) {
            continue;
        }
        let _guard = db.locks().read(key);
        if db.map().contains(key) {
            present += 1;
        }
    }
    Reply::integer(present)
}

/// KEYS pattern
///
/// Walks a snapshot of the keyspace and reports keys matching the glob
/// pattern. Expired keys encountered on the way are evicted, not reported.
fn keys(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("keys");
    }
    let pattern = &argv[1];

    let mut matches = Vec::new();
    for key in db.map().keys() {
        if db.check_ttl(&key) && glob_match(pattern, &key) {
            matches.push(Reply::Bulk(key));
        }
    }
    Reply::Array(matches)
}

/// EXPIRE key seconds [NX|XX|GT|LT]
///
/// Sets the TTL to now + seconds, gated by the flag:
/// - NX: only when the key has no TTL;
/// - XX: only when it already has one;
/// - GT / LT: only when the new deadline is later / earlier than the
///   existing one (no existing TTL fails both).
///
/// Replies 1 when the TTL was set, 0 when the key is missing or the gate
/// blocked the update. A non-positive seconds value deletes the key
/// outright, the deadline being already due.
fn expire(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 && argv.len() != 4 {
        return Reply::wrong_arity("expire");
    }
    let key = &argv[1];
    let Some(seconds) = parse_int(&argv[2]) else {
        return integer_error();
    };

    enum Gate {
        Always,
        IfNone,
        IfSome,
        IfGreater,
        IfLess,
    }
    let gate = match argv.get(3) {
        None => Gate::Always,
        Some(flag) => match flag.to_ascii_lowercase().as_slice() {
            b"nx" => Gate::IfNone,
            b"xx" => Gate::IfSome,
            b"gt" => Gate::IfGreater,
            b"lt" => Gate::IfLess,
            _ => return Reply::syntax_error(),
        },
    };

    if !db.check_ttl(key) {
        return Reply::integer(0);
    }
    let _guard = db.locks().write(key);
    if !db.map().contains(key) {
        return Reply::integer(0);
    }

    let deadline = epoch_seconds() + seconds;
    let existing = db.expire_at(key);
    let pass = match gate {
        Gate::Always => true,
        Gate::IfNone => existing.is_none(),
        Gate::IfSome => existing.is_some(),
        Gate::IfGreater => matches!(existing, Some(at) if deadline > at),
        Gate::IfLess => matches!(existing, Some(at) if deadline < at),
    };
    if !pass {
        return Reply::integer(0);
    }

    if seconds <= 0 {
        // already due; remove instead of arming a dead timer
        db.delete_key(key);
        return Reply::integer(1);
    }
    Reply::integer(i64::from(db.set_ttl(key, deadline)))
}

/// PERSIST key
fn persist(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("persist");
    }
    let key = &argv[1];

    if !db.check_ttl(key) {
        return Reply::integer(0);
    }
    let _guard = db.locks().write(key);
    Reply::integer(i64::from(db.delete_ttl(key)))
}

/// TTL key
///
/// Seconds remaining, -1 for a key without a TTL, -2 for a missing key.
fn ttl(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("ttl");
    }
    let key = &argv[1];

    if !db.check_ttl(key) {
        return Reply::integer(-2);
    }
    let _guard = db.locks().read(key);
    if !db.map().contains(key) {
        return Reply::integer(-2);
    }
    match db.expire_at(key) {
        None => Reply::integer(-1),
        Some(at) => Reply::integer(at - epoch_seconds()),
    }
}

/// RENAME old new
///
/// Atomic over both keys. The destination is overwritten, TTL included.
/// A TTL on the old key moves with the value; without one the new key has
/// none.
fn rename(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("rename");
    }
    let old = &argv[1];
    let new = &argv[2];

    if !db.check_ttl(old) {
        return Reply::error("ERR no such key");
    }
    let _guards = db.locks().write_multi(&[old.as_ref(), new.as_ref()]);

    let Some(value) = db.map().get(old) else {
        return Reply::error("ERR no such key");
    };
    let carried_ttl = db.expire_at(old);

    db.delete_key(old);
    db.delete_key(new);
    db.map().set(new.clone(), value);
    if let Some(at) = carried_ttl {
        db.set_ttl(new, at);
    }
    Reply::ok()
}
