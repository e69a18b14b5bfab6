use crate::image::PdfImage;
use crate::types::{Color, Pt};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetFontName(String),
    SetFontSize(Pt),
    /// Baseline origin in native page space.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    /// Bottom-left corner in native page space.
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub commands: Vec<Command>,
}

/// A string draw with the font state in effect when it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub page_index: usize,
    pub font_name: String,
    pub font_size: Pt,
    pub x: Pt,
    pub y: Pt,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
struct GraphicsState {
    fill_color: Color,
    font_size: Pt,
    font_name: String,
}

impl GraphicsState {
    fn initial() -> Self {
        Self {
            fill_color: Color::BLACK,
            font_size: Pt::from_f32(12.0),
            font_name: crate::font::DEFAULT_FONT.to_string(),
        }
    }
}

/// Records overlay drawing for the pages of an existing document. Pages are
/// addressed by index; draw order within a page is preserved exactly.
pub struct Canvas {
    pages: Vec<Page>,
    states: Vec<GraphicsState>,
    state_stack: Vec<GraphicsState>,
    current: usize,
    images: Vec<(String, PdfImage)>,
}

impl Canvas {
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: vec![Page::default(); page_count],
            states: vec![GraphicsState::initial(); page_count],
            state_stack: Vec::new(),
            current: 0,
            images: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Directs subsequent commands at `page_index`. Returns false when the
    /// page does not exist; the current page is left unchanged.
    pub fn select_page(&mut self, page_index: usize) -> bool {
        if page_index >= self.pages.len() {
            return false;
        }
        if page_index != self.current {
            self.state_stack.clear();
            self.current = page_index;
        }
        true
    }

    fn push(&mut self, command: Command) {
        if let Some(page) = self.pages.get_mut(self.current) {
            page.commands.push(command);
        }
    }

    fn state_mut(&mut self) -> Option<&mut GraphicsState> {
        self.states.get_mut(self.current)
    }

    pub fn save_state(&mut self) {
        if let Some(state) = self.states.get(self.current).cloned() {
            self.state_stack.push(state);
            self.push(Command::SaveState);
        }
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            if let Some(current) = self.state_mut() {
                *current = state;
            }
            self.push(Command::RestoreState);
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        match self.state_mut() {
            Some(state) if state.fill_color != color => state.fill_color = color,
            _ => return,
        }
        self.push(Command::SetFillColor(color));
    }

    pub fn set_font_name(&mut self, name: &str) {
        match self.state_mut() {
            Some(state) if state.font_name != name => state.font_name = name.to_string(),
            _ => return,
        }
        self.push(Command::SetFontName(name.to_string()));
    }

    pub fn set_font_size(&mut self, size: Pt) {
        match self.state_mut() {
            Some(state) if state.font_size != size => state.font_size = size,
            _ => return,
        }
        self.push(Command::SetFontSize(size));
    }

    pub fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub fn draw_image(&mut self, x: Pt, y: Pt, width: Pt, height: Pt, resource_id: impl Into<String>) {
        self.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            resource_id: resource_id.into(),
        });
    }

    /// Stores a decoded image and returns the id draw commands refer to it by.
    pub fn register_image(&mut self, image: PdfImage) -> String {
        let resource_id = format!("FsIm{}", self.images.len() + 1);
        self.images.push((resource_id.clone(), image));
        resource_id
    }

    pub fn image(&self, resource_id: &str) -> Option<&PdfImage> {
        self.images
            .iter()
            .find(|(id, _)| id == resource_id)
            .map(|(_, image)| image)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|page| page.commands.is_empty())
    }

    pub fn command_count(&self) -> usize {
        self.pages.iter().map(|page| page.commands.len()).sum()
    }

    /// Every string draw, in recording order, with its effective font.
    pub fn text_runs(&self) -> Vec<TextRun> {
        let mut runs = Vec::new();
        for (page_index, page) in self.pages.iter().enumerate() {
            let mut state = GraphicsState::initial();
            let mut stack = Vec::new();
            for command in &page.commands {
                match command {
                    Command::SaveState => stack.push(state.clone()),
                    Command::RestoreState => {
                        if let Some(saved) = stack.pop() {
                            state = saved;
                        }
                    }
                    Command::SetFillColor(color) => state.fill_color = *color,
                    Command::SetFontName(name) => state.font_name = name.clone(),
                    Command::SetFontSize(size) => state.font_size = *size,
                    Command::DrawString { x, y, text } => runs.push(TextRun {
                        page_index,
                        font_name: state.font_name.clone(),
                        font_size: state.font_size,
                        x: *x,
                        y: *y,
                        text: text.clone(),
                    }),
                    Command::DrawImage { .. } => {}
                }
            }
        }
        runs
    }

    pub fn into_parts(self) -> (Vec<Page>, Vec<(String, PdfImage)>) {
        (self.pages, self.images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_not_recorded() {
        let mut canvas = Canvas::new(1);
        canvas.set_font_name("Courier");
        canvas.set_font_name("Courier");
        canvas.set_font_size(Pt::from_f32(9.0));
        canvas.set_font_size(Pt::from_f32(9.0));
        canvas.set_fill_color(Color::BLACK);
        assert_eq!(canvas.command_count(), 2);
    }

    #[test]
    fn restore_reverts_tracked_state() {
        let mut canvas = Canvas::new(1);
        canvas.save_state();
        canvas.set_font_name("Courier");
        canvas.draw_string(Pt::ZERO, Pt::ZERO, "a");
        canvas.restore_state();
        canvas.draw_string(Pt::ZERO, Pt::ZERO, "b");
        let runs = canvas.text_runs();
        assert_eq!(runs[0].font_name, "Courier");
        assert_eq!(runs[1].font_name, "Helvetica");
    }

    #[test]
    fn commands_land_on_the_selected_page() {
        let mut canvas = Canvas::new(2);
        assert!(canvas.select_page(1));
        canvas.draw_string(Pt::ZERO, Pt::ZERO, "second");
        assert!(!canvas.select_page(5));
        canvas.draw_string(Pt::ZERO, Pt::ZERO, "still second");
        assert!(canvas.pages()[0].commands.is_empty());
        assert_eq!(canvas.pages()[1].commands.len(), 2);
        assert_eq!(canvas.text_runs()[0].page_index, 1);
    }
}
