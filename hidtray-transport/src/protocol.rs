//! Wire formats: HID++ short/long framing and the HyperX vendor commands

/// HID++ 2.0 framing (minimum needed for presence and battery)
pub mod hidpp {
    use std::ops::RangeInclusive;

    /// Short report ID (7 bytes including report ID)
    pub const REPORT_SHORT: u8 = 0x10;
    pub const SHORT_LEN: usize = 7;
    /// Long report ID (20 bytes including report ID)
    pub const REPORT_LONG: u8 = 0x11;
    pub const LONG_LEN: usize = 20;

    /// Device index addressing a directly connected device
    pub const DEVICE_INDEX_DIRECT: u8 = 0xFF;
    /// Device indices of receiver pairing slots
    pub const RECEIVER_SLOTS: RangeInclusive<u8> = 1..=6;

    /// Software ID stamped into every request (low nibble of byte 3)
    pub const SOFTWARE_ID: u8 = 0x0A;
    /// Byte echoed back by a ping
    pub const PING_DATA: u8 = 0xAA;

    /// Feature index marking a HID++ 2.0 error reply
    pub const ERROR_20: u8 = 0xFF;
    /// Sub ID marking a HID++ 1.0 error reply
    pub const ERROR_10: u8 = 0x8F;

    /// Feature IDs
    pub mod feature {
        /// IRoot, always at feature index 0
        pub const ROOT: u16 = 0x0000;
        /// Device name and type
        pub const DEVICE_NAME: u16 = 0x0005;
        /// Battery level and status
        pub const BATTERY_STATUS: u16 = 0x1000;
        /// Unified battery
        pub const UNIFIED_BATTERY: u16 = 0x1004;
    }

    /// Function IDs (upper nibble of byte 3)
    pub mod function {
        pub const ROOT_GET_FEATURE: u8 = 0x00;
        pub const ROOT_PING: u8 = 0x01;
        pub const NAME_GET_COUNT: u8 = 0x00;
        pub const NAME_GET_NAME: u8 = 0x01;
        pub const NAME_GET_TYPE: u8 = 0x02;
        pub const BATTERY_GET_LEVEL: u8 = 0x00;
        pub const UNIFIED_GET_STATUS: u8 = 0x01;
    }

    #[inline]
    fn function_byte(function: u8) -> u8 {
        (function << 4) | (SOFTWARE_ID & 0x0F)
    }

    /// Build a short request; params beyond 3 bytes are dropped
    pub fn short_request(
        device_index: u8,
        feature_index: u8,
        function: u8,
        params: &[u8],
    ) -> [u8; SHORT_LEN] {
        let mut buf = [0u8; SHORT_LEN];
        buf[0] = REPORT_SHORT;
        buf[1] = device_index;
        buf[2] = feature_index;
        buf[3] = function_byte(function);
        let n = params.len().min(SHORT_LEN - 4);
        buf[4..4 + n].copy_from_slice(&params[..n]);
        buf
    }

    /// Build a long request; params beyond 16 bytes are dropped
    pub fn long_request(
        device_index: u8,
        feature_index: u8,
        function: u8,
        params: &[u8],
    ) -> [u8; LONG_LEN] {
        let mut buf = [0u8; LONG_LEN];
        buf[0] = REPORT_LONG;
        buf[1] = device_index;
        buf[2] = feature_index;
        buf[3] = function_byte(function);
        let n = params.len().min(LONG_LEN - 4);
        buf[4..4 + n].copy_from_slice(&params[..n]);
        buf
    }

    /// Classification of an incoming report against an outstanding request
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Reply<'a> {
        /// Response payload (bytes after the 4-byte header)
        Data(&'a [u8]),
        /// Error reply with its error code
        Error(u8),
        /// Not addressed to this request (notification, other device, ...)
        Unrelated,
    }

    /// Match a received report against the request it may answer
    pub fn match_reply(buf: &[u8], device_index: u8, feature_index: u8, function: u8) -> Reply<'_> {
        if buf.len() < SHORT_LEN
            || !matches!(buf[0], REPORT_SHORT | REPORT_LONG)
            || buf[1] != device_index
        {
            return Reply::Unrelated;
        }

        let fn_byte = function_byte(function);
        if matches!(buf[2], ERROR_20 | ERROR_10) && buf[3] == feature_index && buf[4] == fn_byte {
            return Reply::Error(buf[5]);
        }
        if buf[2] == feature_index && buf[3] == fn_byte {
            return Reply::Data(&buf[4..]);
        }
        Reply::Unrelated
    }

    /// Charging state reported by the battery features
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChargeState {
        Discharging,
        Charging,
        Full,
        NotCharging,
        Unknown,
    }

    /// Battery telemetry decoded from a feature response
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BatteryLevel {
        pub percentage: u8,
        pub state: ChargeState,
    }

    /// Decode a UNIFIED_BATTERY getStatus payload
    ///
    /// - byte 0: state of charge (0-100)
    /// - byte 1: level flags
    /// - byte 2: charging status
    pub fn parse_unified_battery(payload: &[u8]) -> Option<BatteryLevel> {
        if payload.len() < 3 || payload[0] > 100 {
            return None;
        }
        let state = match payload[2] {
            0 => ChargeState::Discharging,
            1 | 2 => ChargeState::Charging,
            3 => ChargeState::Full,
            4 => ChargeState::NotCharging,
            _ => ChargeState::Unknown,
        };
        Some(BatteryLevel {
            percentage: payload[0],
            state,
        })
    }

    /// Decode a BATTERY_STATUS getLevel payload
    ///
    /// - byte 0: current level (0-100)
    /// - byte 1: next reported level
    /// - byte 2: status (0 discharging, 1 recharging, 2 almost full,
    ///   3 full, 4 slow recharge, 5+ errors)
    pub fn parse_battery_status(payload: &[u8]) -> Option<BatteryLevel> {
        if payload.len() < 3 || payload[0] > 100 {
            return None;
        }
        let state = match payload[2] {
            0 => ChargeState::Discharging,
            1 | 2 | 4 => ChargeState::Charging,
            3 => ChargeState::Full,
            5..=7 => ChargeState::NotCharging,
            _ => ChargeState::Unknown,
        };
        Some(BatteryLevel {
            percentage: payload[0],
            state,
        })
    }
}

/// HyperX headset vendor reports
pub mod hyperx {
    /// Size of the command buffer written each cycle
    pub const WRITE_LEN: usize = 52;
    /// Size of the response read each cycle
    pub const READ_LEN: usize = 20;
    /// Response read timeout
    pub const READ_TIMEOUT_MS: i32 = 1000;
    /// Report ID of the priming read required by Kingston-era headsets
    pub const PRIME_REPORT_ID: u8 = 0x06;
    /// Buffer size of the priming read
    pub const PRIME_LEN: usize = 160;

    /// Battery query selected for a headset
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct VendorCommand {
        /// Short label for logs
        pub variant: &'static str,
        /// Bytes written to the device
        pub write: [u8; WRITE_LEN],
        /// Offset of the battery percentage in the response
        pub battery_offset: usize,
        /// Issue the priming input report read before writing
        pub needs_priming: bool,
    }

    impl VendorCommand {
        fn new(variant: &'static str, bytes: &[(usize, u8)], battery_offset: usize) -> Self {
            let mut write = [0u8; WRITE_LEN];
            for &(index, value) in bytes {
                write[index] = value;
            }
            Self {
                variant,
                write,
                battery_offset,
                needs_priming: false,
            }
        }

        fn primed(mut self) -> Self {
            self.needs_priming = true;
            self
        }
    }

    const CLOUD_II_WIRELESS: &[(usize, u8)] = &[(0, 0x06), (1, 0xFF), (2, 0xBB), (3, 0x02)];

    fn contains_ci(haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Pick the battery query for a headset, first match wins
    ///
    /// HP-branded products are matched by product substring with a generic
    /// HP fallback; anything else is treated as a Kingston-era headset.
    pub fn select_command(manufacturer: &str, product: &str) -> VendorCommand {
        if contains_ci(manufacturer, "HP") {
            if contains_ci(product, "Cloud II Core") {
                return VendorCommand::new("hp-cloud-ii-core", &[(0, 0x66), (1, 0x89)], 4);
            }
            if contains_ci(product, "Cloud II Wireless")
                || contains_ci(product, "Cloud Stinger 2 Wireless")
            {
                return VendorCommand::new("hp-cloud-ii-wireless", CLOUD_II_WIRELESS, 7);
            }
            if contains_ci(product, "Cloud Alpha Wireless") {
                return VendorCommand::new(
                    "hp-cloud-alpha-wireless",
                    &[(0, 0x21), (1, 0xBB), (2, 0x0B)],
                    3,
                );
            }
            return VendorCommand::new("hp-default", CLOUD_II_WIRELESS, 7);
        }

        VendorCommand::new(
            "kingston",
            &[
                (0, 0x06),
                (2, 0x02),
                (4, 0x9A),
                (7, 0x68),
                (8, 0x4A),
                (9, 0x8E),
                (10, 0x0A),
                (14, 0xBB),
                (15, 0x02),
            ],
            7,
        )
        .primed()
    }

    /// Extract the battery percentage from a response
    ///
    /// `read` is the number of bytes the device actually returned.
    /// Returns `None` for empty reads, offsets past the data, and
    /// values outside 0-100.
    pub fn battery_from_response(response: &[u8], read: usize, offset: usize) -> Option<u8> {
        if read == 0 || offset >= read.min(response.len()) {
            return None;
        }
        let value = response[offset];
        (value <= 100).then_some(value)
    }
}
