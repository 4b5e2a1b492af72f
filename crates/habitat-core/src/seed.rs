//! Default habitats: a greenhouse and a terrarium, each with one
//! five-channel power strip and one temperature/humidity sensor.

use crate::device::{Device, Outlet};
use crate::persistence::Tables;
use crate::sensor::Sensor;
use crate::zone::{Zone, ZoneMode};

struct HabitatSeed {
    slug: &'static str,
    name: &'static str,
    strip_id: &'static str,
    strip_name: &'static str,
    /// (role, custom name) for switch_1..switch_5
    outlets: [(&'static str, &'static str); 5],
    sensor_id: &'static str,
    sensor_name: &'static str,
}

const HABITATS: [HabitatSeed; 2] = [
    HabitatSeed {
        slug: "serra",
        name: "Serra 🌱",
        strip_id: "bfac84583c14518dedjatx",
        strip_name: "Alimentazione Serra",
        outlets: [
            ("heating", "Presa 1"),
            ("lighting", "Presa 2"),
            ("ventilation", "Presa 3"),
            ("irrigation", "Presa 4"),
            ("usb", "USB (2A+1C)"),
        ],
        sensor_id: "bffca357e3c45a16783rsa",
        sensor_name: "Sensore Serra",
    },
    HabitatSeed {
        slug: "terrario",
        name: "Terrario 🐢",
        strip_id: "bf706e173c8fca8ec2evnv",
        strip_name: "Alimentazione Terrario",
        outlets: [
            ("uvb", "UVB"),
            ("heating", "Spot Riscaldamento"),
            ("ceramic", "Ceramica Notte"),
            ("humidity", "Umidificatore"),
            ("usb", "USB (2A+1C)"),
        ],
        sensor_id: "bfcd3d17b88bd88cc0qeie",
        sensor_name: "Sensore Terrario",
    },
];

pub(crate) fn populate(tables: &mut Tables) {
    let mut outlet_id = tables.outlets.keys().next_back().copied().unwrap_or(0);

    for (index, habitat) in HABITATS.iter().enumerate() {
        let id = index as i64 + 1;

        tables.zones.insert(
            id,
            Zone {
                id,
                slug: habitat.slug.to_string(),
                name: habitat.name.to_string(),
                mode: ZoneMode::Manual,
                active: true,
                settings: serde_json::json!({}),
            },
        );

        tables.devices.insert(
            id,
            Device {
                id,
                provider: "tuya".to_string(),
                provider_device_id: habitat.strip_id.to_string(),
                name: habitat.strip_name.to_string(),
                zone_id: id,
                meta: serde_json::json!({"type": "power_strip", "model": "ANTELA"}),
            },
        );

        for (channel, (role, custom_name)) in habitat.outlets.iter().enumerate() {
            outlet_id += 1;
            let mut outlet = Outlet::new(outlet_id, id, format!("switch_{}", channel + 1));
            outlet.role = Some((*role).to_string());
            outlet.custom_name = Some((*custom_name).to_string());
            tables.outlets.insert(outlet_id, outlet);
        }

        tables.sensors.insert(
            id,
            Sensor {
                id,
                zone_id: id,
                provider: "nous_e6".to_string(),
                provider_sensor_id: Some(habitat.sensor_id.to_string()),
                kind: "temperature_humidity".to_string(),
                name: habitat.sensor_name.to_string(),
            },
        );
    }
}
