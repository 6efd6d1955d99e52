/// Bouncing balls - a reflection integrator with collision listeners
use rand::Rng;

/// Area the balls move in, in the same units as their positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Colour {
    /// Random hue at 70% brightness, half transparent.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let (r, g, b): (f32, f32, f32) = (rng.gen(), rng.gen(), rng.gen());
        let max = r.max(g).max(b).max(f32::EPSILON);
        let scale = 0.7 * 255.0 / max;
        Self {
            r: (r * scale) as u8,
            g: (g * scale) as u8,
            b: (b * scale) as u8,
            a: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub size: f32,
    pub colour: Colour,
}

impl Ball {
    pub fn new(x: f32, y: f32, dx: f32, dy: f32, size: f32) -> Self {
        Self {
            x,
            y,
            dx,
            dy,
            size,
            colour: Colour {
                r: 178,
                g: 178,
                b: 178,
                a: 128,
            },
        }
    }

    /// Somewhere in the top-left 100×100, moving up to 2 units per tick on
    /// each axis, 10 to 39 units across.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            x: rng.gen::<f32>() * 100.0,
            y: rng.gen::<f32>() * 100.0,
            dx: rng.gen::<f32>() * 4.0 - 2.0,
            dy: rng.gen::<f32>() * 4.0 - 2.0,
            size: rng.gen_range(10..40) as f32,
            colour: Colour::random(rng),
        }
    }

    /// Move by one tick of velocity and turn back from any edge crossed.
    ///
    /// The velocity sign is forced toward the interior rather than flipped, so
    /// a ball already heading inward keeps its direction. Returns whether any
    /// edge was hit.
    pub fn step(&mut self, area: Bounds) -> bool {
        let mut bounced = false;

        self.x += self.dx;
        self.y += self.dy;

        let max_x = area.width - self.size;
        let max_y = area.height - self.size;

        if self.x < 0.0 {
            self.dx = self.dx.abs();
            bounced = true;
        }
        if self.x > max_x {
            self.dx = -self.dx.abs();
            bounced = true;
        }
        if self.y < 0.0 {
            self.dy = self.dy.abs();
            bounced = true;
        }
        if self.y > max_y {
            self.dy = -self.dy.abs();
            bounced = true;
        }

        bounced
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collision {
    /// Index of the ball in its field
    pub ball: usize,
    pub x: f32,
    pub y: f32,
}

pub trait CollisionListener {
    fn ball_collision(&mut self, collision: &Collision);
}

impl<F: FnMut(&Collision)> CollisionListener for F {
    fn ball_collision(&mut self, collision: &Collision) {
        self(collision)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners, notified newest first.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<(ListenerId, Box<dyn CollisionListener>)>,
    next_id: u64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Box<dyn CollisionListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notify(&mut self, collision: &Collision) {
        for (_, listener) in self.entries.iter_mut().rev() {
            listener.ball_collision(collision);
        }
    }
}

/// Balls sharing one area and one set of listeners
pub struct BallField {
    balls: Vec<Ball>,
    area: Bounds,
    listeners: Listeners,
}

impl BallField {
    pub fn new(area: Bounds) -> Self {
        Self {
            balls: Vec::new(),
            area,
            listeners: Listeners::new(),
        }
    }

    pub fn with_random_balls<R: Rng + ?Sized>(area: Bounds, count: usize, rng: &mut R) -> Self {
        let mut field = Self::new(area);
        for _ in 0..count {
            field.push(Ball::random(rng));
        }
        field
    }

    pub fn push(&mut self, ball: Ball) -> usize {
        self.balls.push(ball);
        self.balls.len() - 1
    }

    pub fn balls(&self) -> &[Ball] {
        &self.balls
    }

    pub fn area(&self) -> Bounds {
        self.area
    }

    pub fn set_area(&mut self, area: Bounds) {
        self.area = area;
    }

    pub fn add_listener(&mut self, listener: impl CollisionListener + 'static) -> ListenerId {
        self.listeners.add(Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Advance every ball by one tick. Each ball that hit an edge produces one
    /// notification, however many edges it hit.
    pub fn tick(&mut self) -> Vec<Collision> {
        let mut collisions = Vec::new();
        for (index, ball) in self.balls.iter_mut().enumerate() {
            if ball.step(self.area) {
                collisions.push(Collision {
                    ball: index,
                    x: ball.x,
                    y: ball.y,
                });
            }
        }

        for collision in &collisions {
            log::debug!("ball {} bounced", collision.ball);
            self.listeners.notify(collision);
        }
        collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    const AREA: Bounds = Bounds {
        width: 100.0,
        height: 100.0,
    };

    #[test]
    fn test_free_flight() {
        let mut ball = Ball::new(10.0, 20.0, 1.5, -0.5, 10.0);
        assert!(!ball.step(AREA));
        assert_eq!((ball.x, ball.y), (11.5, 19.5));
        assert_eq!((ball.dx, ball.dy), (1.5, -0.5));
    }

    #[test]
    fn test_left_edge_forces_positive() {
        let mut ball = Ball::new(0.5, 50.0, -1.0, 0.0, 10.0);
        assert!(ball.step(AREA));
        assert_eq!(ball.dx, 1.0);
    }

    #[test]
    fn test_right_and_bottom_edges_force_negative() {
        let mut ball = Ball::new(89.5, 89.5, 1.0, 1.0, 10.0);
        assert!(ball.step(AREA));
        assert_eq!((ball.dx, ball.dy), (-1.0, -1.0));
    }

    #[test]
    fn test_sign_is_forced_not_flipped() {
        // Outside the left edge but already moving inward
        let mut ball = Ball::new(-5.0, 50.0, 1.0, 0.0, 10.0);
        assert!(ball.step(AREA));
        assert_eq!(ball.dx, 1.0);
    }

    #[test]
    fn test_corner_hit_notifies_once() {
        let mut field = BallField::new(AREA);
        field.push(Ball::new(0.5, 0.5, -1.0, -1.0, 10.0));
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        field.add_listener(move |_: &Collision| *c.borrow_mut() += 1);

        let collisions = field.tick();

        assert_eq!(collisions.len(), 1);
        assert_eq!(*count.borrow(), 1);
        assert_eq!((field.balls()[0].dx, field.balls()[0].dy), (1.0, 1.0));
    }

    #[test]
    fn test_listeners_run_newest_first() {
        let mut field = BallField::new(AREA);
        field.push(Ball::new(0.5, 50.0, -1.0, 0.0, 10.0));
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            field.add_listener(move |_: &Collision| order.borrow_mut().push(name));
        }

        field.tick();

        assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_removed_listener_is_not_called() {
        let mut field = BallField::new(AREA);
        field.push(Ball::new(0.5, 50.0, -1.0, 0.0, 10.0));
        let hits = Rc::new(RefCell::new(Vec::new()));
        let h = Rc::clone(&hits);
        let id = field.add_listener(move |c: &Collision| h.borrow_mut().push(c.ball));

        assert!(field.remove_listener(id));
        assert!(!field.remove_listener(id));
        field.tick();

        assert!(hits.borrow().is_empty());
    }

    #[test]
    fn test_collision_reports_ball_index() {
        let mut field = BallField::new(AREA);
        field.push(Ball::new(50.0, 50.0, 1.0, 1.0, 10.0));
        field.push(Ball::new(89.5, 50.0, 1.0, 0.0, 10.0));

        let collisions = field.tick();

        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].ball, 1);
    }

    #[test]
    fn test_random_balls_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let field = BallField::with_random_balls(AREA, 20, &mut rng);
        for ball in field.balls() {
            assert!((0.0..100.0).contains(&ball.x));
            assert!((0.0..100.0).contains(&ball.y));
            assert!((-2.0..2.0).contains(&ball.dx));
            assert!((-2.0..2.0).contains(&ball.dy));
            assert!((10.0..40.0).contains(&ball.size));
            assert_eq!(ball.colour.a, 128);
        }
    }

    #[test]
    fn test_ball_stays_in_area() {
        let mut ball = Ball::new(30.0, 70.0, 1.75, -1.25, 25.0);
        let mut bounces = 0;
        for _ in 0..1000 {
            if ball.step(AREA) {
                bounces += 1;
            }
            assert!(ball.x >= -2.0 && ball.x <= AREA.width - ball.size + 2.0);
            assert!(ball.y >= -2.0 && ball.y <= AREA.height - ball.size + 2.0);
        }
        assert!(bounces > 0);
    }
}
