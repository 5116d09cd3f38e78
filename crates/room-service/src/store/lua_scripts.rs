//! Lua scripts for atomic room-membership operations.
//!
//! Each script runs atomically in Redis, so membership changes and the
//! "room became empty" transition are observed by exactly one caller.
//!
//! Scripts that return records return flat arrays of strings so the client
//! can decode them as `Vec<String>` regardless of Redis protocol version.

/// Create a room hash and its settings unless the room already exists.
///
/// Arguments:
/// - KEYS[1]: Room hash (`room:{code}`)
/// - KEYS[2]: Settings (`room:{code}:settings`)
/// - ARGV[1]: TTL seconds
/// - ARGV[2]: Settings JSON
/// - ARGV[3..]: Hash field-value pairs
///
/// Returns:
/// - 1: Created
/// - 0: Room already exists
pub const CREATE_ROOM_IF_ABSENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end

for i = 3, #ARGV, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[1])
return 1
";

/// Add a member to an existing room.
///
/// Arguments:
/// - KEYS[1]: Room hash
/// - KEYS[2]: Membership set
/// - KEYS[3]: Participant record
/// - KEYS[4]: User rooms index (`user:{id}:rooms`)
/// - KEYS[5]: Waiting queue hash
/// - KEYS[6]: User waiting index (`user:{id}:waiting`)
/// - KEYS[7]: Admitted set
/// - KEYS[8]: Settings
/// - ARGV[1]: User id
/// - ARGV[2]: Participant JSON
/// - ARGV[3]: Room TTL seconds
/// - ARGV[4]: Participant TTL seconds
/// - ARGV[5]: Now (epoch ms)
/// - ARGV[6]: Room code
///
/// Returns:
/// - 1: Added
/// - 0: Room hash missing
pub const ADD_MEMBER: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end

redis.call('SADD', KEYS[2], ARGV[1])
redis.call('EXPIRE', KEYS[2], ARGV[3])
redis.call('SET', KEYS[3], ARGV[2], 'EX', ARGV[4])
redis.call('SADD', KEYS[4], ARGV[6])
redis.call('EXPIRE', KEYS[4], ARGV[4])

-- Waiting and membership are mutually exclusive
redis.call('HDEL', KEYS[5], ARGV[1])
redis.call('SREM', KEYS[6], ARGV[6])
redis.call('SREM', KEYS[7], ARGV[1])

redis.call('HSET', KEYS[1], 'last_activity', ARGV[5])
redis.call('EXPIRE', KEYS[1], ARGV[3])
redis.call('EXPIRE', KEYS[8], ARGV[3])
return 1
";

/// Refresh the TTLs of a connected member and the room it is in.
///
/// Arguments:
/// - KEYS[1]: Room hash
/// - KEYS[2]: Membership set
/// - KEYS[3]: Participant record
/// - KEYS[4]: User rooms index
/// - KEYS[5]: Settings
/// - ARGV[1]: User id
/// - ARGV[2]: Participant JSON, written only if the record expired
/// - ARGV[3]: Room TTL seconds
/// - ARGV[4]: Participant TTL seconds
/// - ARGV[5]: Now (epoch ms)
/// - ARGV[6]: Room code
///
/// Returns:
/// - 1: Refreshed
/// - 0: User is not a member
pub const TOUCH_MEMBER: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 0 then
    return 0
end

if redis.call('EXPIRE', KEYS[3], ARGV[4]) == 0 then
    redis.call('SET', KEYS[3], ARGV[2], 'EX', ARGV[4])
end
redis.call('SADD', KEYS[4], ARGV[6])
redis.call('EXPIRE', KEYS[4], ARGV[4])

redis.call('EXPIRE', KEYS[2], ARGV[3])
redis.call('EXPIRE', KEYS[5], ARGV[3])
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('HSET', KEYS[1], 'last_activity', ARGV[5])
    redis.call('EXPIRE', KEYS[1], ARGV[3])
end
return 1
";

/// Replace a string value only if it still holds the expected one.
///
/// Arguments:
/// - KEYS[1]: Key
/// - ARGV[1]: '1' if an expected value follows, '0' if the key must be absent
/// - ARGV[2]: Expected value
/// - ARGV[3]: New value
/// - ARGV[4]: TTL seconds
///
/// Returns:
/// - 1: Written
/// - 0: Current value did not match
pub const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end

redis.call('SET', KEYS[1], ARGV[3], 'EX', ARGV[4])
return 1
";

/// Remove a member and reap the room if it became empty.
///
/// Only a caller that actually removed a member can reap, so a stray leave on
/// a freshly created, still-empty room does not delete it.
///
/// Arguments:
/// - KEYS[1]: Room hash
/// - KEYS[2]: Membership set
/// - KEYS[3]: Participant record
/// - KEYS[4]: User rooms index
/// - KEYS[5]: Settings
/// - KEYS[6]: Waiting queue hash
/// - KEYS[7]: Admitted set
/// - ARGV[1]: User id
/// - ARGV[2]: Room code
///
/// Returns `{removed, reaped, field1, value1, ...}` where `removed` and
/// `reaped` are `'1'` or `'0'` and room fields follow only when reaped.
pub const REMOVE_MEMBER: &str = r"
local removed = redis.call('SREM', KEYS[2], ARGV[1])
redis.call('DEL', KEYS[3])
redis.call('SREM', KEYS[4], ARGV[2])

if removed == 0 or redis.call('SCARD', KEYS[2]) > 0 then
    return {tostring(removed), '0'}
end

local room = redis.call('HGETALL', KEYS[1])
local deleted = redis.call('DEL', KEYS[1])
redis.call('DEL', KEYS[2], KEYS[5], KEYS[6], KEYS[7])

if deleted == 0 then
    return {'1', '0'}
end

local result = {'1', '1'}
for i = 1, #room do
    result[#result + 1] = room[i]
end
return result
";

/// Reap an empty room created before a cutoff.
///
/// Arguments:
/// - KEYS[1]: Room hash
/// - KEYS[2]: Membership set
/// - KEYS[3]: Settings
/// - KEYS[4]: Waiting queue hash
/// - KEYS[5]: Admitted set
/// - ARGV[1]: Cutoff (epoch ms)
///
/// Returns the room hash as a flat field-value array, or an empty array if
/// the room was not reaped.
pub const REAP_IF_STALE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {}
end
if redis.call('SCARD', KEYS[2]) > 0 then
    return {}
end

local created = tonumber(redis.call('HGET', KEYS[1], 'created_at'))
local cutoff = tonumber(ARGV[1])
if created == nil or cutoff == nil or created >= cutoff then
    return {}
end

local room = redis.call('HGETALL', KEYS[1])
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5])
return room
";

/// Queue a user in the waiting room.
///
/// Arguments:
/// - KEYS[1]: Room hash
/// - KEYS[2]: Membership set
/// - KEYS[3]: Waiting queue hash
/// - KEYS[4]: User waiting index
/// - ARGV[1]: User id
/// - ARGV[2]: Waiting entry JSON
/// - ARGV[3]: TTL seconds
/// - ARGV[4]: Room code
///
/// Returns:
/// - >0: Queue length after enqueue
/// - -1: Room missing
/// - -2: User is already a member
pub const ENQUEUE_WAITING: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
    return -2
end

redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
redis.call('EXPIRE', KEYS[3], ARGV[3])
redis.call('SADD', KEYS[4], ARGV[4])
redis.call('EXPIRE', KEYS[4], ARGV[3])
return redis.call('HLEN', KEYS[3])
";

/// Remove a waiting entry, optionally recording admission.
///
/// Arguments:
/// - KEYS[1]: Waiting queue hash
/// - KEYS[2]: User waiting index
/// - KEYS[3]: Admitted set
/// - ARGV[1]: User id
/// - ARGV[2]: Room code
/// - ARGV[3]: '1' to admit, '0' otherwise
/// - ARGV[4]: Admission TTL seconds
///
/// Returns the removed entry JSON, or nil if the user was not waiting.
pub const DEQUEUE_WAITING: &str = r"
local entry = redis.call('HGET', KEYS[1], ARGV[1])
redis.call('SREM', KEYS[2], ARGV[2])
if not entry then
    return false
end

redis.call('HDEL', KEYS[1], ARGV[1])
if ARGV[3] == '1' then
    redis.call('SADD', KEYS[3], ARGV[1])
    redis.call('EXPIRE', KEYS[3], ARGV[4])
end
return entry
";
