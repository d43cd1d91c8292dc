//! List commands, including the blocking pops.
//!
//! All handlers here operate on the list value variant; a key holding a
//! string makes them fail with WRONGTYPE before any mutation. A pop, trim,
//! or remove that leaves a list empty deletes the key and its TTL: an empty
//! list is never observable.

use crate::commands::registry::{CommandRegistry, HandlerFuture};
use crate::commands::parse_int;
use crate::db::Database;
use crate::protocol::Reply;
use crate::storage::{List, Value};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How often a blocking pop rescans its keys.
const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn register(registry: &mut CommandRegistry) {
    registry.register("llen", llen);
    registry.register("lindex", lindex);
    registry.register("lpos", lpos);
    registry.register("lpop", lpop);
    registry.register("rpop", rpop);
    registry.register("lpush", lpush);
    registry.register("lpushx", lpushx);
    registry.register("rpush", rpush);
    registry.register("rpushx", rpushx);
    registry.register("lset", lset);
    registry.register("lrem", lrem);
    registry.register("ltrim", ltrim);
    registry.register("lrange", lrange);
    registry.register("lmove", lmove);
    registry.register_blocking("blpop", blpop);
    registry.register_blocking("brpop", brpop);
}

fn integer_error() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Left,
    Right,
}

fn parse_end(arg: &[u8]) -> Option<End> {
    if arg.eq_ignore_ascii_case(b"left") {
        Some(End::Left)
    } else if arg.eq_ignore_ascii_case(b"right") {
        Some(End::Right)
    } else {
        None
    }
}

/// Deletes `key` (and its TTL) when its list is empty. The caller holds the
/// key's write lock.
fn delete_if_empty(db: &Database, key: &[u8], handle: &Arc<Mutex<List>>) {
    if handle.lock().unwrap().is_empty() {
        db.map().delete(key);
        db.delete_ttl(key);
    }
}

/// LLEN key
fn llen(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::wrong_arity("llen");
    }
    let key = &argv[1];

    if !db.check_ttl(key) {
        return Reply::integer(0);
    }
    let _guard = db.locks().read(key);
    match db.map().get(key) {
        None => Reply::integer(0),
        Some(Value::List(handle)) => Reply::integer(handle.lock().unwrap().len() as i64),
        Some(_) => Reply::wrong_type(),
    }
}

/// LINDEX key index
fn lindex(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::wrong_arity("lindex");
    }
    let key = &argv[1];
    let Some(index) = parse_int(&argv[2]) else {
        return integer_error();
    };

    if !db.check_ttl(key) {
        return Reply::NullBulk;
    }
    let _guard = db.locks().read(key);
    match db.map().get(key) {
        None => Reply::NullBulk,
        Some(Value::List(handle)) => match handle.lock().unwrap().get(index) {
            Some(val) => Reply::Bulk(val.clone()),
            None => Reply::NullBulk,
        },
        Some(_) => Reply::wrong_type(),
    }
}

/// Shared body of LPUSH/RPUSH/LPUSHX/RPUSHX. Values are applied in argv
/// order, so `LPUSH k a b c` leaves the list as `[c, b, a]`.
fn push(db: &Database, argv: &[Bytes], end: End, require_existing: bool, cmd: &str) -> Reply {
    if argv.len() < 3 {
        return Reply::wrong_arity(cmd);
    }
    let key = &argv[1];

    db.check_ttl(key);
    let _guard = db.locks().write(key);

    let handle = match db.map().get(key) {
        Some(Value::List(handle)) => handle,
        Some(_) => return Reply::wrong_type(),
        None => {
            if require_existing {
                return Reply::integer(0);
            }
            let handle = Arc::new(Mutex::new(List::new()));
            db.map()
                .set(key.clone(), Value::List(Arc::clone(&handle)));
            handle
        }
    };

    let mut list = handle.lock().unwrap();
    for val in &argv[2..] {
        match end {
            End::Left => list.push_front(val.clone()),
            End::Right => list.push_back(val.clone()),
        }
    }
    Reply::integer(list.len() as i64)
}

/// LPUSH key value [value ...]
fn lpush(db: &Database, argv: &[Bytes]) -> Reply {
    push(db, argv, End::Left, false, "lpush")
}

/// LPUSHX key value [value ...]
fn lpushx(db: &Database, argv: &[Bytes]) -> Reply {
    push(db, argv, End::Left, true, "lpushx")
}

/// RPUSH key value [value ...]
fn rpush(db: &Database, argv: &[Bytes]) -> Reply {
    push(db, argv, End::Right, false, "rpush")
}

/// RPUSHX key value [value ...]
fn rpushx(db: &Database, argv: &[Bytes]) -> Reply {
    push(db, argv, End::Right, true, "rpushx")
}

/// Shared body of LPOP/RPOP.
///
/// Without a count the reply is a bulk string (nil when nothing is there);
/// with a count it is an array of up to `count` elements in pop order.
fn pop(db: &Database, argv: &[Bytes], end: End, cmd: &str) -> Reply {
    if argv.len() != 2 && argv.len() != 3 {
        return Reply::wrong_arity(cmd);
    }
    let key = &argv[1];
    let count = match argv.get(2) {
        None => None,
        Some(arg) => match parse_int(arg) {
            Some(n) if n > 0 => Some(n as usize),
            _ => return integer_error(),
        },
    };
    let miss = || match count {
        None => Reply::NullBulk,
        Some(_) => Reply::NullArray,
    };

    if !db.check_ttl(key) {
        return miss();
    }
    let _guard = db.locks().write(key);

    let handle = match db.map().get(key) {
        None => return miss(),
        Some(Value::List(handle)) => handle,
        Some(_) => return Reply::wrong_type(),
    };

    let mut popped = Vec::new();
    {
        let mut list = handle.lock().unwrap();
        let wanted = count.unwrap_or(1);
        for _ in 0..wanted {
            let val = match end {
                End::Left => list.pop_front(),
                End::Right => list.pop_back(),
            };
            match val {
                Some(val) => popped.push(val),
                None => break,
            }
        }
    }
    delete_if_empty(db, key, &handle);

    match count {
        None => match popped.pop() {
            Some(val) => Reply::Bulk(val),
            None => Reply::NullBulk,
        },
        Some(_) => Reply::Array(popped.into_iter().map(Reply::Bulk).collect()),
    }
}

/// LPOP key [count]
fn lpop(db: &Database, argv: &[Bytes]) -> Reply {
    pop(db, argv, End::Left, "lpop")
}

/// RPOP key [count]
fn rpop(db: &Database, argv: &[Bytes]) -> Reply {
    pop(db, argv, End::Right, "rpop")
}

/// LSET key index value
fn lset(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("lset");
    }
    let key = &argv[1];
    let Some(index) = parse_int(&argv[2]) else {
        return integer_error();
    };

    if !db.check_ttl(key) {
        return Reply::error("ERR no such key");
    }
    let _guard = db.locks().write(key);
    match db.map().get(key) {
        None => Reply::error("ERR no such key"),
        Some(Value::List(handle)) => {
            if handle.lock().unwrap().set(index, argv[3].clone()) {
                Reply::ok()
            } else {
                Reply::error("ERR index out of range")
            }
        }
        Some(_) => Reply::wrong_type(),
    }
}

/// LREM key count element
///
/// `count > 0` removes the first `count` occurrences head to tail,
/// `count < 0` the last `|count|` tail to head, `count == 0` all of them.
fn lrem(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("lrem");
    }
    let key = &argv[1];
    let Some(count) = parse_int(&argv[2]) else {
        return integer_error();
    };

    if !db.check_ttl(key) {
        return Reply::integer(0);
    }
    let _guard = db.locks().write(key);
    match db.map().get(key) {
        None => Reply::integer(0),
        Some(Value::List(handle)) => {
            let removed = handle.lock().unwrap().remove_element(&argv[3], count);
            delete_if_empty(db, key, &handle);
            Reply::integer(removed as i64)
        }
        Some(_) => Reply::wrong_type(),
    }
}

/// LTRIM key start end
fn ltrim(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("ltrim");
    }
    let key = &argv[1];
    let (Some(start), Some(stop)) = (parse_int(&argv[2]), parse_int(&argv[3])) else {
        return integer_error();
    };

    if !db.check_ttl(key) {
        return Reply::ok();
    }
    let _guard = db.locks().write(key);
    match db.map().get(key) {
        None => Reply::ok(),
        Some(Value::List(handle)) => {
            handle.lock().unwrap().trim(start, stop);
            delete_if_empty(db, key, &handle);
            Reply::ok()
        }
        Some(_) => Reply::wrong_type(),
    }
}

/// LRANGE key start end
fn lrange(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::wrong_arity("lrange");
    }
    let key = &argv[1];
    let (Some(start), Some(stop)) = (parse_int(&argv[2]), parse_int(&argv[3])) else {
        return integer_error();
    };

    if !db.check_ttl(key) {
        return Reply::Array(Vec::new());
    }
    let _guard = db.locks().read(key);
    match db.map().get(key) {
        None => Reply::Array(Vec::new()),
        Some(Value::List(handle)) => {
            let items = handle.lock().unwrap().range(start, stop);
            Reply::Array(items.into_iter().map(Reply::Bulk).collect())
        }
        Some(_) => Reply::wrong_type(),
    }
}

/// LMOVE src dst LEFT|RIGHT LEFT|RIGHT
///
/// Pops from one end of `src` and pushes to one end of `dst` atomically
/// (both keys locked up front, in the global order). The destination is
/// created on demand; a source left empty is deleted.
fn lmove(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() != 5 {
        return Reply::wrong_arity("lmove");
    }
    let src = &argv[1];
    let dst = &argv[2];
    let (Some(from), Some(to)) = (parse_end(&argv[3]), parse_end(&argv[4])) else {
        return Reply::syntax_error();
    };

    if !db.check_ttl(src) {
        return Reply::NullBulk;
    }
    db.check_ttl(dst);

    let _guards = db.locks().write_multi(&[src.as_ref(), dst.as_ref()]);

    let src_handle = match db.map().get(src) {
        None => return Reply::NullBulk,
        Some(Value::List(handle)) => handle,
        Some(_) => return Reply::wrong_type(),
    };
    // type-check the destination before touching the source
    let dst_existing = match db.map().get(dst) {
        Some(Value::List(handle)) => Some(handle),
        Some(_) => return Reply::wrong_type(),
        None => None,
    };

    let elem = {
        let mut src_list = src_handle.lock().unwrap();
        match from {
            End::Left => src_list.pop_front(),
            End::Right => src_list.pop_back(),
        }
    };
    let Some(elem) = elem else {
        return Reply::NullBulk;
    };

    let dst_handle = match dst_existing {
        Some(handle) => handle,
        None => {
            let handle = Arc::new(Mutex::new(List::new()));
            db.map()
                .set(dst.clone(), Value::List(Arc::clone(&handle)));
            handle
        }
    };
    {
        let mut dst_list = dst_handle.lock().unwrap();
        match to {
            End::Left => dst_list.push_front(elem.clone()),
            End::Right => dst_list.push_back(elem.clone()),
        }
    }

    delete_if_empty(db, src, &src_handle);
    Reply::Bulk(elem)
}

/// LPOS key element [RANK rank] [COUNT count] [MAXLEN maxlen]
///
/// Scans head to tail for a positive rank, tail to head for a negative one,
/// reporting head-based positions either way. The first `|rank| - 1`
/// matches are skipped. Without COUNT the reply is the next match position
/// (or nil); with COUNT it is up to `count` positions, 0 meaning unlimited.
/// MAXLEN bounds how many nodes are examined (0 means no bound).
fn lpos(db: &Database, argv: &[Bytes]) -> Reply {
    if argv.len() < 3 || (argv.len() - 3) % 2 != 0 {
        return Reply::wrong_arity("lpos");
    }
    let key = &argv[1];
    let element = &argv[2];

    let mut rank: i64 = 1;
    let mut count: Option<usize> = None;
    let mut maxlen: usize = 0;

    let mut i = 3;
    while i < argv.len() {
        let opt = argv[i].to_ascii_lowercase();
        let arg = &argv[i + 1];
        match opt.as_slice() {
            b"rank" => {
                rank = match parse_int(arg) {
                    Some(0) | None => return Reply::error("ERR RANK can't be zero"),
                    Some(n) => n,
                };
            }
            b"count" => {
                count = match parse_int(arg) {
                    Some(n) if n >= 0 => Some(n as usize),
                    _ => return Reply::error("ERR COUNT can't be negative"),
                };
            }
            b"maxlen" => {
                maxlen = match parse_int(arg) {
                    Some(n) if n >= 0 => n as usize,
                    _ => return Reply::error("ERR MAXLEN can't be negative"),
                };
            }
            _ => return Reply::syntax_error(),
        }
        i += 2;
    }

    if !db.check_ttl(key) {
        return Reply::NullBulk;
    }
    let _guard = db.locks().read(key);
    let handle = match db.map().get(key) {
        None => return Reply::NullBulk,
        Some(Value::List(handle)) => handle,
        Some(_) => return Reply::wrong_type(),
    };

    let list = handle.lock().unwrap();
    let len = list.len();
    let forward = rank > 0;
    let skip = rank.unsigned_abs() as usize - 1;

    let mut positions: Vec<i64> = Vec::new();
    let mut matched = 0usize;
    let mut examined = 0usize;

    let iter: Box<dyn Iterator<Item = (usize, &Bytes)> + '_> = if forward {
        Box::new(list.iter().enumerate())
    } else {
        Box::new(list.iter_rev().enumerate().map(move |(i, v)| (len - 1 - i, v)))
    };

    for (pos, val) in iter {
        if maxlen != 0 && examined == maxlen {
            break;
        }
        examined += 1;

        if val == element {
            matched += 1;
            if matched <= skip {
                continue;
            }
            positions.push(pos as i64);
            match count {
                None => break,
                Some(0) => {}
                Some(limit) => {
                    if positions.len() == limit {
                        break;
                    }
                }
            }
        }
    }

    match count {
        None => match positions.first() {
            Some(&pos) => Reply::integer(pos),
            None => Reply::NullBulk,
        },
        Some(_) => {
            if positions.is_empty() {
                Reply::NullBulk
            } else {
                Reply::Array(positions.into_iter().map(Reply::integer).collect())
            }
        }
    }
}

/// One polling attempt of a blocking pop: expiry check, lock, pop, empty
/// cleanup. Nothing is held when this returns.
fn try_pop(db: &Database, key: &[u8], end: End) -> Option<Bytes> {
    db.check_ttl(key);
    let _guard = db.locks().write(key);

    let handle = match db.map().get(key) {
        Some(Value::List(handle)) => handle,
        _ => return None,
    };
    let popped = {
        let mut list = handle.lock().unwrap();
        match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        }
    };
    if popped.is_some() {
        delete_if_empty(db, key, &handle);
    }
    popped
}

/// Shared body of BLPOP/BRPOP.
///
/// Keys are examined in argv order; the first hit is returned as
/// `[key, value]`. Until then the handler polls at a bounded interval. A
/// timeout of 0 waits forever; an expired timeout yields the nil bulk
/// string. Dropping the connection drops this future and with it the wait.
async fn bpop(db: &Database, argv: &[Bytes], end: End, cmd: &str) -> Reply {
    if argv.len() < 3 {
        return Reply::wrong_arity(cmd);
    }
    let keys = &argv[1..argv.len() - 1];
    let timeout = match parse_int(&argv[argv.len() - 1]) {
        None => return Reply::error("ERR timeout is not an integer or out of range"),
        Some(n) if n < 0 => return Reply::error("ERR timeout is negative"),
        Some(n) => n,
    };
    let deadline = (timeout > 0).then(|| Instant::now() + Duration::from_secs(timeout as u64));

    loop {
        for key in keys {
            if let Some(val) = try_pop(db, key, end) {
                return Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Bulk(val)]);
            }
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Reply::NullBulk;
            }
        }
        tokio::time::sleep(BLOCK_POLL_INTERVAL).await;
    }
}

/// BLPOP key [key ...] timeout
fn blpop<'a>(db: &'a Database, argv: &'a [Bytes]) -> HandlerFuture<'a> {
    Box::pin(bpop(db, argv, End::Left, "blpop"))
}

/// BRPOP key [key ...] timeout
fn brpop<'a>(db: &'a Database, argv: &'a [Bytes]) -> HandlerFuture<'a> {
    Box::pin(bpop(db, argv, End::Right, "brpop"))
}

/// Seeds a list value. Test helper for other command modules.
#[cfg(test)]
pub(crate) fn rpush_for_tests(db: &Database, key: &str, vals: &[&str]) {
    let mut argv = vec![Bytes::from("RPUSH".to_string()), Bytes::from(key.to_string())];
    argv.extend(vals.iter().map(|v| Bytes::from(v.to_string())));
    assert!(!rpush(db, &argv).is_error());
}
