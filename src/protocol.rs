//! Bridge command set and protocol timing.
//!
//! Every command is a single ASCII byte; address and data bytes follow as
//! raw binary. The bridge never acknowledges during the write loop, so
//! correctness rests entirely on the fixed delays below.

/// Drive the target reset line high, holding it in programming state
pub const RESET_HIGH: u8 = b'o';

/// Drive the target reset line low, releasing it to run
pub const RESET_LOW: u8 = b'c';

/// Issue the programming-enable sequence on the ISP pins
pub const PROG_ENABLE: u8 = b'p';

/// Start a full chip erase
pub const ERASE_CHIP: u8 = b'e';

/// Latch the low address byte that follows
pub const ADDR_LSB: u8 = b'a';

/// Latch the high address byte that follows
pub const ADDR_MSB: u8 = b'A';

/// Latch the data byte that follows
pub const CONTENT: u8 = b'd';

/// Strobe the write-and-settle cycle for the latched address and data
pub const WRITE_PROG: u8 = b'w';

/// Read back the low signature byte (the reply is not consumed)
pub const READ_ID_LSB: u8 = b's';

/// Read back the high signature byte (the reply is not consumed)
pub const READ_ID_MSB: u8 = b'S';

/// Read back a byte of program memory; reserved by the bridge firmware,
/// unused by this client
pub const READ_PROG: u8 = b'r';

/// Delay after each command/value pair in the write loop
pub const WRITE_DELAY_MS: u32 = 10;

/// Chip erase cycle time
pub const ERASE_DELAY_MS: u32 = 500;

/// Settle time around reset and program-enable transitions
pub const ENABLE_DELAY_MS: u32 = 2;

/// Settle time after the final reset release, before the port is closed
pub const RELEASE_DELAY_MS: u32 = 100;
