// locus_node/src/config/serde_helpers.rs

//! `#[serde(with = ...)]` adapters so TOML can describe mounts as plain
//! arrays: `[x, y, z]` meters and `[roll, pitch, yaw]` degrees.

pub mod vec3_from_array {
    use nalgebra::Vector3;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(vec: &Vector3<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq([vec.x, vec.y, vec.z].iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vector3<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let arr: [f64; 3] = Deserialize::deserialize(deserializer)?;
        Ok(Vector3::from(arr))
    }
}

pub mod quat_from_euler_deg {
    use nalgebra::UnitQuaternion;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(quat: &UnitQuaternion<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (roll, pitch, yaw) = quat.euler_angles();
        let arr = [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()];
        serializer.collect_seq(arr.iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<UnitQuaternion<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let arr: [f64; 3] = Deserialize::deserialize(deserializer)?;
        Ok(UnitQuaternion::from_euler_angles(
            arr[0].to_radians(), // Roll
            arr[1].to_radians(), // Pitch
            arr[2].to_radians(), // Yaw
        ))
    }
}
