//! Embedded Python bridge script and its deployment.
//!
//! The script is stored as a string constant and written to disk on first
//! use, or when the embedded version changes (detected via a `.hash`
//! sidecar holding a truncated SHA-256 of the content).

use crate::config::BridgeConfig;
use crate::error::IoResultExt;
use crate::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Python side of the stage protocol.
///
/// Sub-commands: `signature`, `preset`, `call`. Each prints exactly one JSON
/// line with a `kind` field on stdout; anything the stage itself prints is
/// redirected to stderr.
pub const STAGE_BRIDGE_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Introspect and call a Python SfM stage entry point.

Replies are single JSON lines on stdout. Output produced by the stage is
redirected to stderr so it cannot be confused with a reply.
"""
import argparse
import contextlib
import importlib
import inspect
import json
import sys
import traceback
from pathlib import Path

ARGUMENT_MISMATCH_EXIT = 3


def reply(kind, **kwargs):
    print(json.dumps({"kind": kind, **kwargs}), flush=True)


def resolve(module, function):
    return getattr(importlib.import_module(module), function)


def decode(arg):
    kind, value = arg["type"], arg.get("value")
    if kind == "path":
        return Path(value)
    return value


def describe(param):
    if param.kind is inspect.Parameter.VAR_POSITIONAL:
        return "*" + param.name
    if param.kind is inspect.Parameter.VAR_KEYWORD:
        return "**" + param.name
    return param.name


def cmd_signature(args):
    fn = resolve(args.module, args.function)
    try:
        params = [describe(p) for p in inspect.signature(fn).parameters.values()]
    except (TypeError, ValueError):
        params = None
    reply("signature", params=params)


def cmd_preset(args):
    module = importlib.import_module(args.module)
    confs = getattr(module, "confs", None) or {}
    reply("preset", conf=confs.get(args.key))


def cmd_call(args):
    fn = resolve(args.module, args.function)
    payload = json.load(sys.stdin)
    positional = [decode(a) for a in payload.get("positional", [])]
    keyword = {k: decode(v) for k, v in payload.get("keyword", {}).items()}
    try:
        with contextlib.redirect_stdout(sys.stderr):
            fn(*positional, **keyword)
    except TypeError as e:
        reply("argument_mismatch", message=str(e))
        sys.exit(ARGUMENT_MISMATCH_EXIT)
    except Exception as e:
        traceback.print_exc(file=sys.stderr)
        reply("error", message=f"{type(e).__name__}: {e}")
        sys.exit(1)
    reply("ok")


def main():
    parser = argparse.ArgumentParser(description="SfM stage bridge")
    sub = parser.add_subparsers(dest="command", required=True)

    sig = sub.add_parser("signature")
    sig.add_argument("--module", required=True)
    sig.add_argument("--function", default="main")

    preset = sub.add_parser("preset")
    preset.add_argument("--module", required=True)
    preset.add_argument("--key", required=True)

    call = sub.add_parser("call")
    call.add_argument("--module", required=True)
    call.add_argument("--function", default="main")

    args = parser.parse_args()
    try:
        {"signature": cmd_signature, "preset": cmd_preset, "call": cmd_call}[args.command](args)
    except ImportError as e:
        reply("error", message=f"cannot import stage module: {e}")
        sys.exit(1)


if __name__ == "__main__":
    main()
"#;

/// Short hash of a string for staleness checking.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Write the bridge script into `dir` if missing or outdated and return its path.
pub fn ensure_bridge_deployed(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_path(dir)?;

    let script_path = dir.join(BridgeConfig::SCRIPT_FILENAME);
    let hash_path = dir.join(format!("{}.hash", BridgeConfig::SCRIPT_FILENAME));
    let current_hash = content_hash(STAGE_BRIDGE_SCRIPT);

    if script_path.exists() {
        if let Ok(stored_hash) = std::fs::read_to_string(&hash_path) {
            if stored_hash.trim() == current_hash {
                debug!("Stage bridge up to date at {}", script_path.display());
                return Ok(script_path);
            }
        }
    }

    std::fs::write(&script_path, STAGE_BRIDGE_SCRIPT).with_path(&script_path)?;
    std::fs::write(&hash_path, &current_hash).with_path(&hash_path)?;
    info!("Stage bridge deployed to {}", script_path.display());
    Ok(script_path)
}
