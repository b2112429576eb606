//! Protocol enumerations carried in the frame header.
//!
//! The `type` byte of a frame is interpreted through one of these tables
//! depending on the command. Codes are fixed by the wire contract; unknown
//! codes stay representable as the raw byte and convert with `TryFrom`.

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $code ),+
        }

        impl $name {
            /// Raw wire code
            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $code => Ok(Self::$variant), )+
                    other => Err(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }
    };
}

wire_enum! {
    /// High-level message category (3 bits in the header)
    pub enum Command {
        Presentation = 0,
        Set = 1,
        Req = 2,
        Internal = 3,
        /// Firmware and other data too large for one frame
        Stream = 4,
    }
}

wire_enum! {
    /// Payload type tag (3 bits in the header)
    pub enum PayloadType {
        String = 0,
        Byte = 1,
        Int16 = 2,
        UInt16 = 3,
        Long32 = 4,
        ULong32 = 5,
        Custom = 6,
        Float32 = 7,
    }
}

wire_enum! {
    /// Control-plane message kinds (for [`Command::Internal`])
    pub enum InternalType {
        BatteryLevel = 0,
        Time = 1,
        Version = 2,
        IdRequest = 3,
        IdResponse = 4,
        InclusionMode = 5,
        Config = 6,
        FindParent = 7,
        FindParentResponse = 8,
        LogMessage = 9,
        Children = 10,
        SketchName = 11,
        SketchVersion = 12,
        Reboot = 13,
        GatewayReady = 14,
        RequestSigning = 15,
        GetNonce = 16,
        GetNonceResponse = 17,
    }
}

wire_enum! {
    /// Sensor classes announced in presentation messages
    pub enum SensorType {
        Door = 0,
        Motion = 1,
        Smoke = 2,
        Light = 3,
        Dimmer = 4,
        Cover = 5,
        Temp = 6,
        Hum = 7,
        Baro = 8,
        Wind = 9,
        Rain = 10,
        Uv = 11,
        Weight = 12,
        Power = 13,
        Heater = 14,
        Distance = 15,
        LightLevel = 16,
        ArduinoNode = 17,
        ArduinoRepeaterNode = 18,
        Lock = 19,
        Ir = 20,
        Water = 21,
        AirQuality = 22,
        Custom = 23,
        Dust = 24,
        SceneController = 25,
        RgbLight = 26,
        ColorSensor = 27,
        Multimeter = 28,
        Sprinkler = 29,
        WaterLeak = 30,
        Sound = 31,
        Vibration = 32,
        RotaryEncoder = 33,
    }
}

wire_enum! {
    /// Sensor variable kinds (for set and req messages)
    pub enum VariableType {
        Temp = 0,
        Hum = 1,
        Light = 2,
        Dimmer = 3,
        Pressure = 4,
        Forecast = 5,
        Rain = 6,
        RainRate = 7,
        Wind = 8,
        Gust = 9,
        Direction = 10,
        Uv = 11,
        Weight = 12,
        Distance = 13,
        Impedance = 14,
        Armed = 15,
        Tripped = 16,
        Watt = 17,
        Kwh = 18,
        SceneOn = 19,
        SceneOff = 20,
        Heater = 21,
        HeaterSw = 22,
        LightLevel = 23,
        Var1 = 24,
        Var2 = 25,
        Var3 = 26,
        Var4 = 27,
        Var5 = 28,
        Up = 29,
        Down = 30,
        Stop = 31,
        IrSend = 32,
        IrReceive = 33,
        Flow = 34,
        Volume = 35,
        LockStatus = 36,
        DustLevel = 37,
        Voltage = 38,
        Current = 39,
        /// Color as ascii hex `RRGGBB`
        Rgb = 40,
        /// Color as ascii hex `RRGGBBWW`
        Rgbw = 41,
        Id = 42,
        LightLevelLux = 43,
        /// Display-only unit prefix such as `cm` or `inch`
        UnitPrefix = 44,
        SoundDb = 45,
        VibrationHz = 46,
        EncoderValue = 47,
    }
}

wire_enum! {
    /// Stream kinds (for [`Command::Stream`])
    pub enum StreamType {
        FirmwareConfigRequest = 0,
        FirmwareConfigResponse = 1,
        FirmwareRequest = 2,
        FirmwareResponse = 3,
        Sound = 4,
        Image = 5,
    }
}

/// Unit system preference pushed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Wire letter used in configuration responses
    pub fn as_char(self) -> char {
        match self {
            Self::Metric => 'M',
            Self::Imperial => 'I',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_convert() {
        assert_eq!(Command::try_from(3), Ok(Command::Internal));
        assert_eq!(PayloadType::try_from(7), Ok(PayloadType::Float32));
        assert_eq!(InternalType::try_from(13), Ok(InternalType::Reboot));
        assert_eq!(SensorType::try_from(17), Ok(SensorType::ArduinoNode));
        assert_eq!(VariableType::try_from(47), Ok(VariableType::EncoderValue));
        assert_eq!(StreamType::try_from(5), Ok(StreamType::Image));
    }

    #[test]
    fn test_unknown_codes_are_returned() {
        assert_eq!(Command::try_from(5), Err(5));
        assert_eq!(InternalType::try_from(18), Err(18));
        assert_eq!(SensorType::try_from(200), Err(200));
    }

    #[test]
    fn test_codes_round_trip_through_u8() {
        for code in 0..=17u8 {
            let kind = InternalType::try_from(code).unwrap();
            assert_eq!(u8::from(kind), code);
        }
    }
}
