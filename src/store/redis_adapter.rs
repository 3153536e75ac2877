// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::sync::LazyLock;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult, Script};

use crate::{
    error::Result,
    pool::PooledConnection,
    store::{HashCommand, HashConnection},
};

/// KEYS[1] object key, ARGV[1] patch JSON, ARGV[2] field id.
///
/// Caller data only travels as arguments, so the source is constant and can
/// be cached server side.
///
/// Top-level members are spliced as raw JSON text. `cjson` only validates the
/// documents and decodes member names; it never re-encodes a value, since it
/// would turn `[]` into `{}` and round numbers to 14 significant digits.
pub(crate) const MERGE_SCRIPT_SOURCE: &str = r#"
local function string_end(text, pos)
    local i = pos + 1
    while true do
        local at = string.find(text, '["\\]', i)
        if string.sub(text, at, at) == '"' then
            return at
        end
        i = at + 2
    end
end

local function value_end(text, pos)
    local c = string.sub(text, pos, pos)
    if c == '"' then
        return string_end(text, pos)
    end
    if c == '{' or c == '[' then
        local depth = 0
        local i = pos
        while true do
            local at = string.find(text, '[%[%]{}"]', i)
            local ch = string.sub(text, at, at)
            if ch == '"' then
                i = string_end(text, at) + 1
            elseif ch == '{' or ch == '[' then
                depth = depth + 1
                i = at + 1
            else
                depth = depth - 1
                if depth == 0 then
                    return at
                end
                i = at + 1
            end
        end
    end
    return string.find(text, '[,}%s]', pos) - 1
end

-- Top-level members of a JSON object as {name, raw name, raw value}.
-- Returns nil and a reason when the text is not a JSON object.
local function members(text)
    if not pcall(cjson.decode, text) then
        return nil, 'is not valid JSON'
    end
    local open = string.find(text, '^%s*{')
    if not open then
        return nil, 'must be a JSON object'
    end

    local out = {}
    local pos = string.find(text, '{', open, true) + 1
    while true do
        pos = string.find(text, '%S', pos)
        local c = string.sub(text, pos, pos)
        if c == '}' then
            return out
        end
        if c == ',' then
            pos = string.find(text, '%S', pos + 1)
        end
        local name_end = string_end(text, pos)
        local raw_name = string.sub(text, pos, name_end)
        local value_start = string.find(text, '%S', string.find(text, ':', name_end + 1, true) + 1)
        local last = value_end(text, value_start)
        out[#out + 1] = {
            cjson.decode('[' .. raw_name .. ']')[1],
            raw_name,
            string.sub(text, value_start, last),
        }
        pos = last + 1
    end
end

local patch, reason = members(ARGV[1])
if not patch then
    return redis.error_reply('ERR merge patch ' .. reason)
end

local current, index = {}, {}
if redis.call('HEXISTS', KEYS[1], ARGV[2]) == 1 then
    current, reason = members(redis.call('HGET', KEYS[1], ARGV[2]))
    if not current then
        return redis.error_reply('ERR stored value ' .. reason)
    end
    for i, member in ipairs(current) do
        index[member[1]] = i
    end
end

for _, member in ipairs(patch) do
    local i = index[member[1]]
    if i then
        current[i] = member
    else
        current[#current + 1] = member
        index[member[1]] = #current
    end
end

local parts = {}
for i, member in ipairs(current) do
    parts[i] = member[2] .. ':' .. member[3]
end
redis.call('HSET', KEYS[1], ARGV[2], '{' .. table.concat(parts, ',') .. '}')
return 1
"#;

static MERGE_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(MERGE_SCRIPT_SOURCE));

#[async_trait]
impl HashConnection for PooledConnection {
    async fn hash_get(&mut self, key: &str, id: &str) -> Result<Option<String>> {
        let result = self
            .connection()
            .hget::<_, _, Option<String>>(key, id)
            .await;
        self.observe(result)
    }

    async fn hash_delete(&mut self, key: &str, id: &str) -> Result<bool> {
        let result = self.connection().hdel::<_, _, i64>(key, id).await;
        self.observe(result).map(|removed| removed > 0)
    }

    async fn hash_merge(&mut self, key: &str, id: &str, patch: &str) -> Result<()> {
        // EVALSHA, falling back to EVAL when the script cache is cold
        let result: RedisResult<i64> = MERGE_SCRIPT
            .key(key)
            .arg(patch)
            .arg(id)
            .invoke_async(self.connection())
            .await;
        self.observe(result).map(|_| ())
    }

    async fn execute(&mut self, commands: &[HashCommand]) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for command in commands {
            match command {
                HashCommand::Delete { key, id } => {
                    pipe.hdel(key, id).ignore();
                }
                HashCommand::Merge { key, id, patch } => {
                    // Plain EVAL: a NOSCRIPT reply cannot be retried mid-pipeline
                    pipe.cmd("EVAL")
                        .arg(MERGE_SCRIPT_SOURCE)
                        .arg(1)
                        .arg(key)
                        .arg(patch)
                        .arg(id)
                        .ignore();
                }
            }
        }

        let result: RedisResult<()> = pipe.query_async(self.connection()).await;
        self.observe(result)
    }
}
