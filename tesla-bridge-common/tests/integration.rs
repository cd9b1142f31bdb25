//! Integration tests for tesla-bridge-common library.

use tesla_bridge_common::{
    CanonicalReading, CanonicalValue, Location, TopicBuilder, VehicleIdentity, VehicleStatus,
    encode_json, encode_value, parse_topic,
};

#[test]
fn test_reading_topic_and_payload() {
    let vehicle = VehicleIdentity::new("5YJ3E1EA7KF000001", 1);
    let reading = CanonicalReading {
        topic_suffix: "odometer_miles".to_string(),
        value: CanonicalValue::Number(160.9),
        vehicle,
    };

    let builder = TopicBuilder::new("myteslamate/cars");
    let topic = builder.reading(reading.vehicle.car_number, &reading.topic_suffix);
    assert_eq!(topic, "myteslamate/cars/1/odometer_miles");

    let payload = encode_value(&reading.value).expect("encode failed");
    assert_eq!(payload, b"160.9");

    // Consumers can map the topic back to the car
    let parsed = parse_topic(builder.prefix(), &topic).expect("parse failed");
    assert_eq!(parsed.car_number, 1);
    assert_eq!(parsed.topic_suffix, "odometer_miles");
}

#[test]
fn test_status_topic_for_every_car() {
    let builder = TopicBuilder::default();

    for car in 1..=9u8 {
        let topic = builder.status(car);
        let parsed = parse_topic(builder.prefix(), &topic).unwrap();
        assert_eq!(parsed.car_number, car);
        assert_eq!(parsed.topic_suffix, "state");
    }
}

#[test]
fn test_location_payload_is_json() {
    let value = CanonicalValue::Location(Location {
        latitude: 37.4847,
        longitude: -122.1477,
    });

    let payload = encode_value(&value).unwrap();
    let decoded: Location = serde_json::from_slice(&payload).unwrap();
    assert_eq!(decoded.latitude, 37.4847);
    assert_eq!(decoded.longitude, -122.1477);
}

#[test]
fn test_status_json_encoding() {
    let payload = encode_json(&serde_json::json!({
        "car": 1,
        "status": VehicleStatus::Online,
    }))
    .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(json["status"], "online");
}
