/// Upper bound for one line on the control socket.
///
/// Requests are small; the largest response is a status snapshot listing every
/// connected player, which stays well below this on any real server.
pub const MAX_CONTROL_LINE_LENGTH: usize = 64 * 1024;
