//! String commands.
//!
//! All handlers here operate on the byte-string value variant. A key holding
//! a list makes them fail with WRONGTYPE before any mutation.

use crate::commands::registry::CommandRegistry;
use crate::commands::{parse_float, parse_int};
use crate::db::{epoch_seconds, Database};
use crate::protocol::Reply;
use crate::storage::Value;
use bytes::Bytes;

pub fn register(registry: &mut CommandRegistry) {
    registry.register("set", set);
    registry.register("get", get);
    registry.register("getrange", getrange);
    registry.register("setrange", setrange);
    registry.register("mget", mget);
    registry.register("mset", mset);
    registry.register("setex", setex);
    registry.register("setnx", setnx);
    registry.register("strlen", strlen);
    registry.register("incr", incr);
    registry.register("incrby", incrby);
    registry.register("decr", decr);
    registry.register("decrby", decrby);
    registry.register("incrbyfloat", incrbyfloat);
    registry.register("append", append);
}

fn integer_error() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

fn float_error() -> Reply {
    Reply::error("ERR value is not a valid float")
}

/// SET key value [NX|XX] [GET] [EX sec | PX ms | EXAT unix_sec | KEEPTTL]
///
/// NX and XX are mutually exclusive, as are the expiry options (KEEPTTL
/// counts as one). The write happens iff the NX/XX condition passes. On a
/// successful write the default is to drop any existing TTL; KEEPTTL
/// preserves it and an expiry option replaces it. With GET the reply is the
/// prior value regardless of whether the write happened.
fn set(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() < 3 {
        return Reply::wrong_arity("set");
    }
    let key = &argv[1];
    let value = argv[2].clone();

    let mut nx = false;
    let mut xx = false;
    let mut get_old = false;
    let mut keepttl = false;
    let mut expire_at: Option<i64> = None;
    let mut ttl_opts = 0;

    let mut i = 3;
    while i < argv.len() {
        let opt = argv[i].to_ascii_lowercase();
        match opt.as_slice() {
            b"nx" => nx = true,
            b"xx" => xx = true,
            b"get" => get_old = true,
            b"keepttl" => {
                keepttl = true;
                ttl_opts += 1;
            }
            b"ex" | b"px" | b"exat" => {
                ttl_opts += 1;
                i += 1;
                if i >= argv.len() {
                    return Reply::syntax_error();
                }
                let Some(n) = parse_int(&argv[i]) else {
                    return integer_error();
                };
                if n <= 0 {
                    return Reply::error("ERR invalid expire time in 'set' command");
                }
                expire_at = Some(match opt.as_slice() {
                    b"ex" => epoch_seconds() + n,
                    b"px" => epoch_seconds() + n / 1000,
                    _ => n,
                });
            }
            _ => return Reply::syntax_error(),
        }
        i += 1;
    }

    if (nx && xx) || ttl_opts > 1 {
        return Reply::syntax_error();
    }

    db.check_ttl(key);
    let _guard = db.locks().write(key);

    let old = db.map().get(key);
    let old_bulk = match &old {
        Some(Value::Str(data)) => Some(data.clone()),
        Some(_) => return Reply::wrong_type(),
        None => None,
    };

    let write = if nx {
        old.is_none()
    } else if xx {
        old.is_some()
    } else {
        true
    };

    if write {
        db.map().set(key.clone(), Value::Str(value));
        if let Some(at) = expire_at {
            db.set_ttl(key, at);
        } else if !keepttl {
            db.delete_ttl(key);
        }
    }

    if get_old {
        return match old_bulk {
            Some(data) => Reply::Bulk(data),
            None => Reply::NullBulk,
        };
    }
    if write {
        Reply::ok()
    } else {
        Reply::NullBulk
    }
}

/// GET key
fn get(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("get");
    }
    let key = &argv[1];

    if !db.check_ttl(key) {
        return Reply::NullBulk;
    }
    let _guard = db.locks().read(key);
    match db.map().get(key) {
        None => Reply::NullBulk,
        Some(Value::Str(data)) => Reply::Bulk(data),
        Some(_) => Reply::wrong_type(),
    }
}

/// GETRANGE key start end
///
/// Both indices may be negative (from the end) and `end` is inclusive. The
/// range is clamped to the value; a degenerate range yields the empty bulk
/// string.
fn getrange(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("getrange");
    }
    let key = &argv[1];
    let (Some(start), Some(end)) = (parse_int(&argv[2]), parse_int(&argv[3])) else {
        return integer_error();
    };

    if !db.check_ttl(key) {
        return Reply::NullBulk;
    }
    let _guard = db.locks().read(key);
    let data = match db.map().get(key) {
        None => return Reply::NullBulk,
        Some(Value::Str(data)) => data,
        Some(_) => return Reply::wrong_type(),
    };

    let len = data.len() as i64;
    let mut start = if start < 0 { len + start } else { start };
    // switch to an exclusive upper bound
    let mut end = 1 + if end < 0 { len + end } else { end };
    if start < 0 {
        start = 0;
    }
    if end > len {
        end = len;
    }
    if start >= end || start >= len {
        return Reply::bulk(Bytes::new());
    }
    Reply::Bulk(data.slice(start as usize..end as usize))
}

/// SETRANGE key offset value
///
/// Overwrites `value.len()` bytes starting at `offset`, zero-padding when
/// the existing value is shorter than the offset. Returns the new length.
fn setrange(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("setrange");
    }
    let key = &argv[1];
    let offset = match parse_int(&argv[2]) {
        Some(n) if n >= 0 => n as usize,
        _ => return integer_error(),
    };
    let value = &argv[3];

    db.check_ttl(key);
    let _guard = db.locks().write(key);

    let mut out = match db.map().get(key) {
        None => Vec::new(),
        Some(Value::Str(data)) => data.to_vec(),
        Some(_) => return Reply::wrong_type(),
    };

    if out.len() < offset + value.len() {
        out.resize(offset + value.len(), 0);
    }
    out[offset..offset + value.len()].copy_from_slice(value);

    let new_len = out.len();
    db.map().set(key.clone(), Value::str(out));
    Reply::integer(new_len as i64)
}

/// MGET key [key ...]
///
/// One slot per key; missing keys and keys of the wrong type both yield the
/// nil bulk string.
fn mget(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() < 2 {
        return Reply::wrong_arity("mget");
    }

    let mut slots = Vec::with_capacity(argv.len() - 1);
    for key in &argv[1..] {
        if !db.check_ttl(key) {
            slots.push(Reply::NullBulk);
            continue;
        }
        let _guard = db.locks().read(key);
        slots.push(match db.map().get(key) {
            Some(Value::Str(data)) => Reply::Bulk(data),
            _ => Reply::NullBulk,
        });
    }
    Reply::Array(slots)
}

/// MSET key value [key value ...]
///
/// Atomic across all keys: every lock involved is taken up front, in the
/// global order. Each written key loses any TTL it had.
fn mset(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() < 3 || (argv.len() - 1) % 2 != 0 {
        return Reply::wrong_arity("mset");
    }

    let keys: Vec<&[u8]> = argv[1..].iter().step_by(2).map(|k| k.as_ref()).collect();
    let _guards = db.locks().write_multi(&keys);

    for pair in argv[1..].chunks_exact(2) {
        db.delete_ttl(&pair[0]);
        db.map().set(pair[0].clone(), Value::Str(pair[1].clone()));
    }
    Reply::ok()
}

/// SETEX key seconds value
fn setex(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("setex");
    }
    let key = &argv[1];
    let seconds = match parse_int(&argv[2]) {
        Some(n) => n,
        None => return integer_error(),
    };
    if seconds <= 0 {
        return Reply::error("ERR invalid expire time in 'setex' command");
    }

    let _guard = db.locks().write(key);
    db.map().set(key.clone(), Value::Str(argv[3].clone()));
    db.set_ttl(key, epoch_seconds() + seconds);
    Reply::ok()
}

/// SETNX key value
fn setnx(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("setnx");
    }
    let key = &argv[1];

    db.check_ttl(key);
    let _guard = db.locks().write(key);
    let added = db
        .map()
        .set_if_not_exists(key.clone(), Value::Str(argv[2].clone()));
    Reply::integer(added)
}

/// STRLEN key
fn strlen(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("strlen");
    }
    let key = &argv[1];

    if !db.check_ttl(key) {
        return Reply::integer(0);
    }
    let _guard = db.locks().read(key);
    match db.map().get(key) {
        None => Reply::integer(0),
        Some(Value::Str(data)) => Reply::integer(data.len() as i64),
        Some(_) => Reply::wrong_type(),
    }
}

/// Shared body of INCR/INCRBY/DECR/DECRBY. A missing key counts as 0 before
/// the delta is applied; the stored value must parse as a signed 64-bit
/// integer; overflow is an error and leaves the value untouched.
fn apply_delta(db: &Database, key: &Bytes, delta: i64) -> Reply {
    db.check_ttl(key);
    let _guard = db.locks().write(key);

    let current = match db.map().get(key) {
        None => 0,
        Some(Value::Str(data)) => match parse_int(&data) {
            Some(n) => n,
            None => return integer_error(),
        },
        Some(_) => return Reply::wrong_type(),
    };

    let Some(next) = current.checked_add(delta) else {
        return Reply::error("ERR increment or decrement would overflow");
    };

    db.map()
        .set(key.clone(), Value::str(next.to_string()));
    Reply::integer(next)
}

/// INCR key
fn incr(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("incr");
    }
    apply_delta(db, &argv[1], 1)
}

/// INCRBY key increment
fn incrby(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("incrby");
    }
    match parse_int(&argv[2]) {
        Some(delta) => apply_delta(db, &argv[1], delta),
        None => integer_error(),
    }
}

/// DECR key
fn decr(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("decr");
    }
    apply_delta(db, &argv[1], -1)
}

/// DECRBY key decrement
fn decrby(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("decrby");
    }
    let Some(decrement) = parse_int(&argv[2]) else {
        return integer_error();
    };
    let Some(delta) = decrement.checked_neg() else {
        return Reply::error("ERR increment or decrement would overflow");
    };
    apply_delta(db, &argv[1], delta)
}

/// INCRBYFLOAT key increment
///
/// Both the stored value and the increment are 64-bit floats. The reply is
/// the new value in its shortest round-trip representation.
fn incrbyfloat(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("incrbyfloat");
    }
    let key = &argv[1];
    let Some(increment) = parse_float(&argv[2]) else {
        return float_error();
    };

    db.check_ttl(key);
    let _guard = db.locks().write(key);

    let current = match db.map().get(key) {
        None => 0.0,
        Some(Value::Str(data)) => match parse_float(&data) {
            Some(f) => f,
            None => return float_error(),
        },
        Some(_) => return Reply::wrong_type(),
    };

    let next = current + increment;
    if !next.is_finite() {
        return Reply::error("ERR increment would produce NaN or Infinity");
    }

    let formatted = next.to_string();
    db.map().set(key.clone(), Value::str(formatted.clone()));
    Reply::bulk(formatted)
}

/// APPEND key value
fn append(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("append");
    }
    let key = &argv[1];
    let suffix = &argv[2];

    db.check_ttl(key);
    let _guard = db.locks().write(key);

    match db.map().get(key) {
        None => {
            db.map().set(key.clone(), Value::Str(suffix.clone()));
            Reply::integer(suffix.len() as i64)
        }
        Some(Value::Str(data)) => {
            let mut combined = Vec::with_capacity(data.len() + suffix.len());
            combined.extend_from_slice(&data);
            combined.extend_from_slice(suffix);
            let new_len = combined.len();
            db.map().set(key.clone(), Value::str(combined));
            Reply::integer(new_len as i64)
        }
        Some(_) => Reply::wrong_type(),
    }
}
