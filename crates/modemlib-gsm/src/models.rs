//! Built-in device models.
//!
//! Each supported modem family is described by a [`ModemModel`] whose
//! [`descriptor()`](ModemModel::descriptor) builds the [`DeviceDescriptor`]
//! the protocol engine runs against. All of them speak standard 3GPP
//! TS 27.007 and share the patterns from
//! [`standard_commands`](crate::commands::standard_commands); they differ in
//! the vendor-specific unsolicited reports they emit and in a few quirks.
//!
//! | Model     | Async prefix | Signals mapped                          | Quirks                         |
//! |-----------|--------------|-----------------------------------------|--------------------------------|
//! | generic   | none         | none                                    | none                           |
//! | huawei    | `^NAME:`     | RSSI, MODE, SRVST, SIMST                | `^BOOT`/`^DSFLOWRPT` ignored   |
//! | option    | `_ONAME:`    | OSIGQ, OSSYSI                           | `_OBS` beacons ignored         |
//! | novatel   | `$NAME:`     | NWRSSI, NWSRVST                         | reports operator names         |
//! | sierra    | `*NAME:`     | CNTI                                    | `+PACSP` ignored               |

use std::time::Duration;

use modemlib_at_io::descriptor::{DescriptorBuilder, DeviceDescriptor, transforms};
use modemlib_core::error::Result;

use crate::commands;

/// Static definition of a modem family.
#[derive(Debug, Clone)]
pub struct ModemModel {
    /// Short identifier used on the command line (e.g. "huawei").
    pub name: &'static str,
    /// Human-readable vendor / family name.
    pub vendor: &'static str,
    /// Default baud rate of the modem's AT port.
    pub default_baud_rate: u32,
    /// Whether `+COPS?` answers with an operator name even when numeric
    /// format was requested.
    pub reports_operator_names: bool,
    configure: fn(DescriptorBuilder) -> DescriptorBuilder,
}

impl ModemModel {
    /// Build the device descriptor for this model.
    pub fn descriptor(&self) -> Result<DeviceDescriptor> {
        let builder = commands::standard_commands(DeviceDescriptor::builder(self.name))
            .default_timeout(Duration::from_secs(5))
            .alphanumeric_operator(self.reports_operator_names);
        (self.configure)(builder).build()
    }
}

/// Any TS 27.007 modem, with no vendor reports mapped.
pub fn generic() -> ModemModel {
    ModemModel {
        name: "generic",
        vendor: "Generic 3GPP",
        default_baud_rate: 115_200,
        reports_operator_names: false,
        configure: |b| b,
    }
}

/// Huawei E-series USB sticks.
///
/// Emits `^RSSI`, `^MODE`, `^SRVST` and `^SIMST` on change, plus periodic
/// `^BOOT` and `^DSFLOWRPT` chatter that carries nothing useful here.
pub fn huawei() -> ModemModel {
    ModemModel {
        name: "huawei",
        vendor: "Huawei",
        default_baud_rate: 115_200,
        reports_operator_names: false,
        configure: |b| {
            b.ignore(r"\r\n\^BOOT:[^\r\n]*\r\n")
                .ignore(r"\r\n\^DSFLOWRPT:[^\r\n]*\r\n")
                .async_pattern(r"\r\n\^(?P<name>[A-Z]+):\s*(?P<value>[^\r\n]*)\r\n")
                .signal("RSSI", "signal_quality", transforms::number)
                .signal("MODE", "system_mode", transforms::number_list)
                .signal("SRVST", "service_status", transforms::number)
                .signal("SIMST", "sim_status", transforms::number_list)
        },
    }
}

/// Option GlobeTrotter cards.
pub fn option() -> ModemModel {
    ModemModel {
        name: "option",
        vendor: "Option",
        default_baud_rate: 115_200,
        reports_operator_names: false,
        configure: |b| {
            b.ignore(r"\r\n_OBS[^\r\n]*\r\n")
                .async_pattern(r"\r\n_O(?P<name>[A-Z]+):\s*(?P<value>[^\r\n]*)\r\n")
                .signal("SIGQ", "signal_quality", transforms::number_list)
                .signal("SSYSI", "system_mode", transforms::number)
        },
    }
}

/// Novatel Merlin / Ovation devices.
///
/// These answer `+COPS?` with the operator name regardless of the format
/// selected, so registration treats any name as "registered".
pub fn novatel() -> ModemModel {
    ModemModel {
        name: "novatel",
        vendor: "Novatel Wireless",
        default_baud_rate: 115_200,
        reports_operator_names: true,
        configure: |b| {
            b.async_pattern(r"\r\n\$(?P<name>[A-Z]+):\s*(?P<value>[^\r\n]*)\r\n")
                .signal("NWRSSI", "signal_quality", transforms::number)
                .signal("NWSRVST", "service_status", transforms::text)
        },
    }
}

/// Sierra Wireless AirCard / MC modules.
pub fn sierra() -> ModemModel {
    ModemModel {
        name: "sierra",
        vendor: "Sierra Wireless",
        default_baud_rate: 115_200,
        reports_operator_names: false,
        configure: |b| {
            b.ignore(r"\r\n\+PACSP\d\r\n")
                .async_pattern(r"\r\n\*(?P<name>[A-Z]+):\s*(?P<value>[^\r\n]*)\r\n")
                .signal("CNTI", "access_technology", transforms::text)
        },
    }
}

/// Every built-in model.
pub fn all_models() -> Vec<ModemModel> {
    vec![generic(), huawei(), option(), novatel(), sierra()]
}

/// Look a model up by its [`name`](ModemModel::name), case-insensitively.
pub fn by_name(name: &str) -> Option<ModemModel> {
    all_models()
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use modemlib_at_io::{Command, Demultiplexer, Engine, Response};
    use modemlib_core::events::{Notification, SignalValue};
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    use super::*;

    fn demux(model: ModemModel) -> Demultiplexer {
        Demultiplexer::new(Arc::new(model.descriptor().unwrap()))
    }

    #[test]
    fn all_models_build() {
        for model in all_models() {
            let d = model.descriptor().unwrap();
            assert_eq!(d.name(), model.name);
            assert_eq!(
                d.timeout_for(commands::LIST_OPERATORS),
                commands::LIST_OPERATORS_TIMEOUT
            );
            assert!(d.command(commands::READ_REG_STATUS).is_some());
        }
    }

    #[test]
    fn all_models_have_unique_names() {
        let models = all_models();
        let mut names: Vec<&str> = models.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), models.len());
    }

    #[test]
    fn all_models_use_115200_baud() {
        for model in all_models() {
            assert_eq!(model.default_baud_rate, 115_200, "{}", model.name);
        }
    }

    #[test]
    fn only_novatel_reports_names() {
        for model in all_models() {
            let d = model.descriptor().unwrap();
            assert_eq!(d.reports_alphanumeric_operator(), model.name == "novatel");
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(by_name("Huawei").unwrap().vendor, "Huawei");
        assert!(by_name("nokia").is_none());
    }

    #[test]
    fn generic_consumes_no_vendor_reports() {
        let mut buf = b"\r\n^RSSI:17\r\n".to_vec();
        assert!(demux(generic()).process(&mut buf).is_empty());
        assert_eq!(buf, b"\r\n^RSSI:17\r\n");
    }

    #[test]
    fn huawei_signals() {
        let mut buf = b"\r\n^BOOT:20332,0,0,0,72\r\n\r\n^MODE:5,4\r\n\r\n^RSSI:23\r\n".to_vec();
        let out = demux(huawei()).process(&mut buf);
        assert_eq!(
            out,
            vec![
                Notification::VendorSignal {
                    name: "system_mode".into(),
                    value: SignalValue::List(vec![5, 4]),
                },
                Notification::VendorSignal {
                    name: "signal_quality".into(),
                    value: SignalValue::Number(23),
                },
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn huawei_vendor_query_keeps_its_answer() {
        let mut engine = Engine::new(Arc::new(huawei().descriptor().unwrap()));
        let (tx, mut rx) = oneshot::channel();
        engine.dispatch(Command::new("SYSINFO", "AT^SYSINFO"), tx, Instant::now());
        let out = engine.feed(b"\r\n^SYSINFO:2,3,0,5,1\r\n\r\nOK\r\n");
        assert!(out.notifications.is_empty());
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            Response::Text("^SYSINFO:2,3,0,5,1".into())
        );
    }

    #[test]
    fn huawei_mapped_signal_during_query_is_published() {
        let mut engine = Engine::new(Arc::new(huawei().descriptor().unwrap()));
        let (tx, mut rx) = oneshot::channel();
        engine.dispatch(Command::new("SYSINFO", "AT^SYSINFO"), tx, Instant::now());
        let out = engine.feed(b"\r\n^RSSI:17\r\n\r\n^SYSINFO:2,3,0,5,1\r\n\r\nOK\r\n");
        assert_eq!(
            out.notifications,
            vec![Notification::VendorSignal {
                name: "signal_quality".into(),
                value: SignalValue::Number(17),
            }]
        );
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            Response::Text("^SYSINFO:2,3,0,5,1".into())
        );
    }

    #[test]
    fn huawei_query_can_claim_a_mapped_signal() {
        let mut engine = Engine::new(Arc::new(huawei().descriptor().unwrap()));
        let (tx, mut rx) = oneshot::channel();
        let cmd = Command::new("RSSI", "AT^RSSI?").soliciting_signal("RSSI");
        engine.dispatch(cmd, tx, Instant::now());
        let out = engine.feed(b"\r\n^RSSI:17\r\n\r\nOK\r\n");
        assert!(out.notifications.is_empty());
        assert_eq!(rx.try_recv().unwrap().unwrap(), Response::Text("^RSSI:17".into()));
    }

    #[test]
    fn option_signals() {
        let mut buf = b"\r\n_OSIGQ: 14,0\r\n".to_vec();
        let out = demux(option()).process(&mut buf);
        assert_eq!(
            out,
            vec![Notification::VendorSignal {
                name: "signal_quality".into(),
                value: SignalValue::List(vec![14, 0]),
            }]
        );
    }

    #[test]
    fn novatel_signals() {
        let mut buf = b"\r\n$NWRSSI: 12\r\n".to_vec();
        let out = demux(novatel()).process(&mut buf);
        assert_eq!(
            out,
            vec![Notification::VendorSignal {
                name: "signal_quality".into(),
                value: SignalValue::Number(12),
            }]
        );
    }

    #[test]
    fn sierra_ignores_pacsp() {
        let mut buf = b"\r\n+PACSP0\r\n\r\n*CNTI: 0,UMTS\r\n".to_vec();
        let out = demux(sierra()).process(&mut buf);
        assert_eq!(
            out,
            vec![Notification::VendorSignal {
                name: "access_technology".into(),
                value: SignalValue::Text("0,UMTS".into()),
            }]
        );
        assert!(buf.is_empty());
    }
}
