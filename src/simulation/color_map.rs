use crate::{floating_type_mod::FT, vec3f, vec4f, V, V4};

pub type Color = V<FT, 3>;

pub struct ColorMap {
    insertions: Vec<(FT, Color)>,
}

impl ColorMap {
    pub fn new(mut insertions: Vec<(FT, Color)>) -> Self {
        insertions.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { insertions }
    }

    /// Red, orange, yellow, green, cyan, blue, magenta at equal spacing over `[0, 1]`.
    pub fn rainbow() -> Self {
        let stops = [
            vec3f(1.0, 0.0, 0.0),
            vec3f(1.0, 0.5, 0.0),
            vec3f(1.0, 1.0, 0.0),
            vec3f(0.0, 1.0, 0.0),
            vec3f(0.0, 1.0, 1.0),
            vec3f(0.0, 0.0, 1.0),
            vec3f(1.0, 0.0, 1.0),
        ];
        let last = (stops.len() - 1) as FT;
        Self::new(
            stops
                .iter()
                .enumerate()
                .map(|(i, &color)| (i as FT / last, color))
                .collect(),
        )
    }

    pub fn get(&self, x: FT) -> Color {
        let (first, last) = match (self.insertions.first(), self.insertions.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Color::zeros(),
        };
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }

        for pair in self.insertions.windows(2) {
            let (x0, c0) = pair[0];
            let (x1, c1) = pair[1];
            if x >= x0 && x <= x1 {
                let interp = (x - x0) / (x1 - x0);
                return c0 + interp * (c1 - c0);
            }
        }

        // only reachable for NaN
        last.1
    }

    pub fn color_stops(&self) -> &[(FT, Color)] {
        &self.insertions
    }
}

/// One RGBA display color per particle, sampled from the rainbow map at `i / n`.
pub fn particle_colors(num_particles: usize) -> Vec<V4> {
    let color_map = ColorMap::rainbow();
    (0..num_particles)
        .map(|i| {
            let c = color_map.get(i as FT / num_particles as FT);
            vec4f(c.x, c.y, c.z, 1.)
        })
        .collect()
}

#[test]
fn rainbow_interpolates_between_stops() {
    let color_map = ColorMap::rainbow();
    assert_eq!(color_map.color_stops().len(), 7);
    assert_eq!(color_map.get(0.), vec3f(1., 0., 0.));
    assert_eq!(color_map.get(1.), vec3f(1., 0., 1.));
    assert_eq!(color_map.get(-3.), vec3f(1., 0., 0.));

    // halfway between red and orange
    let c = color_map.get(1. / 12.);
    assert!((c - vec3f(1., 0.25, 0.)).norm() < 1.0e-5);
    assert!((color_map.get(0.5) - vec3f(0., 1., 0.)).norm() < 1.0e-5);
}

#[test]
fn particle_colors_start_red_and_are_opaque() {
    let colors = particle_colors(100);
    assert_eq!(colors.len(), 100);
    assert_eq!(colors[0], vec4f(1., 0., 0., 1.));
    assert!(colors.iter().all(|c| c.w == 1.));
}
